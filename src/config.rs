#![forbid(unsafe_code)]

//! Runtime settings for the backend binary.
//!
//! Each key resolves from a CLI override, then the process environment, then
//! the `.env` file, then the built-in default. Blank values count as unset.

use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_SOCIALTUBE_PORT: u16 = 8080;
pub const DEFAULT_SOCIALTUBE_HOST: &str = "127.0.0.1";
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 86_400;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 864_000;
pub const DEFAULT_UPLOAD_LIMIT_BYTES: usize = 512 * 1024 * 1024;
pub const DEFAULT_PUBLIC_MEDIA_PREFIX: &str = "/media";
pub const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Clone)]
pub struct ServerConfig {
    pub database_path: PathBuf,
    pub media_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub session_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub upload_limit_bytes: usize,
    pub public_media_prefix: String,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("database_path", &self.database_path)
            .field("media_root", &self.media_root)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("session_secret", &"<redacted>")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("upload_limit_bytes", &self.upload_limit_bytes)
            .field("public_media_prefix", &self.public_media_prefix)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    pub database_path: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_server_config(overrides: ServerOverrides) -> Result<ServerConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_server_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_server_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServerConfig> {
    build_server_config_with_overrides(file_vars, env_lookup, ServerOverrides::default())
}

fn build_server_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ServerOverrides,
) -> Result<ServerConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let database_path = overrides
        .database_path
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("DATABASE_PATH"))
        .ok_or_else(|| anyhow!("DATABASE_PATH not set"))?;
    let media_root = overrides
        .media_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("MEDIA_ROOT"))
        .ok_or_else(|| anyhow!("MEDIA_ROOT not set"))?;
    let port = overrides
        .port
        .or_else(|| parsed(lookup("SOCIALTUBE_PORT")))
        .unwrap_or(DEFAULT_SOCIALTUBE_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("SOCIALTUBE_HOST"))
        .unwrap_or_else(|| DEFAULT_SOCIALTUBE_HOST.to_string());

    let session_secret = lookup("SESSION_SECRET").ok_or_else(|| anyhow!("SESSION_SECRET not set"))?;
    if session_secret.chars().count() < MIN_SESSION_SECRET_LEN {
        bail!("SESSION_SECRET must be at least {MIN_SESSION_SECRET_LEN} characters");
    }

    let access_token_ttl_secs = parsed(lookup("ACCESS_TOKEN_TTL_SECS"))
        .filter(|secs: &i64| *secs > 0)
        .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECS);
    let refresh_token_ttl_secs = parsed(lookup("REFRESH_TOKEN_TTL_SECS"))
        .filter(|secs: &i64| *secs > 0)
        .unwrap_or(DEFAULT_REFRESH_TOKEN_TTL_SECS);
    let upload_limit_bytes = parsed(lookup("UPLOAD_LIMIT_BYTES"))
        .filter(|bytes: &usize| *bytes > 0)
        .unwrap_or(DEFAULT_UPLOAD_LIMIT_BYTES);
    let public_media_prefix = lookup("PUBLIC_MEDIA_PREFIX")
        .map(|prefix| format!("/{}", prefix.trim_matches('/')))
        .filter(|prefix| prefix.len() > 1)
        .unwrap_or_else(|| DEFAULT_PUBLIC_MEDIA_PREFIX.to_string());

    Ok(ServerConfig {
        database_path: PathBuf::from(database_path),
        media_root: PathBuf::from(media_root),
        host,
        port,
        session_secret,
        access_token_ttl_secs,
        refresh_token_ttl_secs,
        upload_limit_bytes,
        public_media_prefix,
    })
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|raw| raw.parse::<T>().ok())
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

/// Parses `KEY=value` lines. Comments, blank lines, an `export ` prefix and
/// matching single or double quotes are handled; anything else is skipped.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(value_raw.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|quote| value.strip_prefix(*quote)?.strip_suffix(*quote))
        .unwrap_or(value)
}
