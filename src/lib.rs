#![forbid(unsafe_code)]

//! SocialTube backend library.
//!
//! Everything the `backend` binary serves lives here: the libsql store, the
//! query builders that assemble feeds, comment threads and channel rollups,
//! and the command handlers that mutate videos, posts, playlists and accounts.
//! The HTTP layer in [`http`] is a thin wrapper over [`platform::Platform`].

pub mod accounts;
pub mod blob;
pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod identity;
pub mod ids;
pub mod models;
pub mod pagination;
pub mod platform;
pub mod playlists;
pub mod posts;
pub mod security;
pub mod stats;
pub mod store;
pub mod threads;
pub mod toggle;
pub mod videos;

#[cfg(test)]
pub(crate) mod testing;
