//! Every component wired to one store, one blob storage and one set of
//! session keys.

use std::sync::Arc;

use crate::accounts::Accounts;
use crate::blob::BlobStorage;
use crate::feed::FeedBuilder;
use crate::playlists::PlaylistCommands;
use crate::posts::PostCommands;
use crate::security::SessionKeys;
use crate::stats::StatsAggregator;
use crate::store::Store;
use crate::threads::ThreadBuilder;
use crate::toggle::ToggleEngine;
use crate::videos::VideoCommands;

#[derive(Clone)]
pub struct Platform {
    pub store: Store,
    pub accounts: Accounts,
    pub feed: FeedBuilder,
    pub threads: ThreadBuilder,
    pub toggles: ToggleEngine,
    pub stats: StatsAggregator,
    pub videos: VideoCommands,
    pub posts: PostCommands,
    pub playlists: PlaylistCommands,
}

impl Platform {
    pub fn new(store: Store, blobs: Arc<dyn BlobStorage>, keys: SessionKeys) -> Self {
        Self {
            accounts: Accounts::new(store.clone(), blobs.clone(), keys),
            feed: FeedBuilder::new(store.clone()),
            threads: ThreadBuilder::new(store.clone()),
            toggles: ToggleEngine::new(store.clone()),
            stats: StatsAggregator::new(store.clone()),
            videos: VideoCommands::new(store.clone(), blobs),
            posts: PostCommands::new(store.clone()),
            playlists: PlaylistCommands::new(store.clone()),
            store,
        }
    }
}
