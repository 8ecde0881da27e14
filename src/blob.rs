//! Media storage collaborator.
//!
//! Commands hand an [`UploadedFile`] to a [`BlobStorage`] and persist only the
//! returned [`StoredObject`]. Upload temp files are owned by the
//! [`UploadedFile`] guard, which removes them when dropped on every path.

use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use mime_guess::{MimeGuess, mime::Mime};
use serde::Serialize;
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::ids::ObjectId;

/// Descriptor returned by the storage backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredObject {
    pub url: String,
    /// Playback length in seconds, when the backend could determine it.
    pub duration: Option<f64>,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload(&self, file: &UploadedFile) -> Result<StoredObject>;

    async fn delete(&self, url: &str) -> Result<()>;
}

/// Deletes a stored object, logging instead of failing.
pub async fn delete_best_effort(storage: &dyn BlobStorage, url: &str) {
    if url.is_empty() {
        return;
    }
    if let Err(err) = storage.delete(url).await {
        warn!(%url, error = %err, "failed to delete stored media");
    }
}

/// A client upload spooled to a local temp file.
#[derive(Debug)]
pub struct UploadedFile {
    path: Option<TempPath>,
    file_name: Option<String>,
    content_type: Option<String>,
    size: u64,
}

impl UploadedFile {
    pub fn new(
        path: TempPath,
        file_name: Option<String>,
        content_type: Option<String>,
        size: u64,
    ) -> Self {
        Self {
            path: Some(path),
            file_name,
            content_type,
            size,
        }
    }

    /// Spools `bytes` into a fresh temp file.
    pub async fn from_bytes(
        bytes: &[u8],
        file_name: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<Self> {
        let temp = tempfile::NamedTempFile::new().context("creating upload temp file")?;
        let path = temp.into_temp_path();
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing upload to {}", path.display()))?;
        Ok(Self::new(
            path,
            file_name.map(str::to_string),
            content_type.map(str::to_string),
            bytes.len() as u64,
        ))
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The declared content type, falling back to a guess from the file name.
    pub fn mime(&self) -> Option<Mime> {
        self.content_type
            .as_deref()
            .and_then(|value| value.parse::<Mime>().ok())
            .filter(|mime| mime.essence_str() != "application/octet-stream")
            .or_else(|| {
                self.file_name
                    .as_deref()
                    .and_then(|name| MimeGuess::from_path(name).first())
            })
    }

    pub fn is_mp4(&self) -> bool {
        self.mime()
            .is_some_and(|mime| mime.essence_str() == "video/mp4")
    }

    pub fn is_image(&self) -> bool {
        self.mime()
            .is_some_and(|mime| mime.type_() == mime_guess::mime::IMAGE)
    }

    pub fn is_gif(&self) -> bool {
        self.mime()
            .is_some_and(|mime| mime.essence_str() == "image/gif")
    }

    /// Lowercase extension for the stored copy, derived from the file name or
    /// the content type.
    pub fn extension(&self) -> Option<String> {
        let from_name = self
            .file_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
        from_name.or_else(|| {
            self.mime()
                .and_then(|mime| mime_guess::get_mime_extensions(&mime))
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
    }
}

impl Drop for UploadedFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let shown = path.display().to_string();
            if let Err(err) = path.close() {
                warn!(path = %shown, error = %err, "failed to remove upload temp file");
            }
        }
    }
}

/// Stores media as plain files under a directory served at `public_prefix`.
#[derive(Debug, Clone)]
pub struct LocalBlobStorage {
    root: PathBuf,
    public_prefix: String,
}

impl LocalBlobStorage {
    pub fn new(root: impl Into<PathBuf>, public_prefix: &str) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating media root {}", root.display()))?;
        Ok(Self {
            root,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Maps a served file name back onto disk. Anything that is not a single
    /// plain path segment is refused.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        is_safe_segment(name).then(|| self.root.join(name))
    }

    fn name_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(&self.public_prefix)?
            .strip_prefix('/')
            .filter(|name| is_safe_segment(name))
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn upload(&self, file: &UploadedFile) -> Result<StoredObject> {
        let name = match file.extension() {
            Some(ext) => format!("{}.{ext}", ObjectId::new()),
            None => ObjectId::new().to_string(),
        };
        let target = self.root.join(&name);
        tokio::fs::copy(file.path(), &target)
            .await
            .with_context(|| format!("copying upload into {}", target.display()))?;

        let duration = if file.is_mp4() {
            probe_mp4_duration(&target).await.unwrap_or_else(|err| {
                debug!(path = %target.display(), error = %err, "could not read mp4 duration");
                None
            })
        } else {
            None
        };

        Ok(StoredObject {
            url: format!("{}/{name}", self.public_prefix),
            duration,
        })
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let Some(name) = self.name_from_url(url) else {
            bail!("{url} is not a locally stored media url");
        };
        match tokio::fs::remove_file(self.root.join(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {name}")),
        }
    }
}

fn is_safe_segment(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

/// Reads the movie header (`moov/mvhd`) of an MP4 file and returns its
/// duration in seconds. Returns `Ok(None)` when the file has no movie header
/// or declares a zero timescale.
pub async fn probe_mp4_duration(path: &Path) -> Result<Option<f64>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_movie_duration(&path))
        .await
        .context("joining mp4 probe task")?
}

fn read_movie_duration(path: &Path) -> Result<Option<f64>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let size = file.metadata()?.len();
    let reader = match mp4::Mp4Reader::read_header(BufReader::new(file), size) {
        Ok(reader) => reader,
        Err(mp4::Error::BoxNotFound(_)) => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("parsing {}", path.display())),
    };
    let header = &reader.moov.mvhd;
    Ok((header.timescale > 0).then(|| header.duration as f64 / header.timescale as f64))
}

#[cfg(test)]
pub(crate) fn sample_mp4(timescale: u32, ticks: u32) -> Vec<u8> {
    let mut mvhd = Vec::new();
    mvhd.extend_from_slice(&[0, 0, 0, 0]);
    mvhd.extend_from_slice(&0u32.to_be_bytes());
    mvhd.extend_from_slice(&0u32.to_be_bytes());
    mvhd.extend_from_slice(&timescale.to_be_bytes());
    mvhd.extend_from_slice(&ticks.to_be_bytes());
    mvhd.extend_from_slice(&[0u8; 80]);

    let mut mvhd_box = ((mvhd.len() + 8) as u32).to_be_bytes().to_vec();
    mvhd_box.extend_from_slice(b"mvhd");
    mvhd_box.extend_from_slice(&mvhd);

    let mut moov_box = ((mvhd_box.len() + 8) as u32).to_be_bytes().to_vec();
    moov_box.extend_from_slice(b"moov");
    moov_box.extend_from_slice(&mvhd_box);

    let mut out = Vec::new();
    out.extend_from_slice(&16u32.to_be_bytes());
    out.extend_from_slice(b"ftypisom");
    out.extend_from_slice(&[0, 0, 2, 0]);
    out.extend_from_slice(&12u32.to_be_bytes());
    out.extend_from_slice(b"mdat");
    out.extend_from_slice(&[1, 2, 3, 4]);
    out.extend_from_slice(&moov_box);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn uploaded_file_removes_temp_path_on_drop() -> Result<()> {
        let upload = UploadedFile::from_bytes(b"hello", Some("a.png"), Some("image/png")).await?;
        let path = upload.path().to_path_buf();
        assert!(path.exists());
        drop(upload);
        assert!(!path.exists(), "temp file should be removed");
        Ok(())
    }

    #[tokio::test]
    async fn mime_falls_back_to_file_name() -> Result<()> {
        let upload =
            UploadedFile::from_bytes(b"x", Some("clip.MP4"), Some("application/octet-stream"))
                .await?;
        assert!(upload.is_mp4());
        assert_eq!(upload.extension().as_deref(), Some("mp4"));

        let gif = UploadedFile::from_bytes(b"x", None, Some("image/gif")).await?;
        assert!(gif.is_image());
        assert!(gif.is_gif());
        assert_eq!(gif.extension().as_deref(), Some("gif"));
        Ok(())
    }

    #[tokio::test]
    async fn local_storage_copies_and_deletes() -> Result<()> {
        let dir = tempdir()?;
        let storage = LocalBlobStorage::new(dir.path().join("media"), "/media/")?;
        let upload = UploadedFile::from_bytes(b"png-bytes", Some("cover.png"), None).await?;

        let stored = storage.upload(&upload).await?;
        assert!(stored.url.starts_with("/media/"));
        assert!(stored.url.ends_with(".png"));
        assert_eq!(stored.duration, None);

        let name = stored.url.trim_start_matches("/media/");
        let on_disk = storage.resolve(name).expect("safe name");
        assert_eq!(std::fs::read(&on_disk)?, b"png-bytes");

        storage.delete(&stored.url).await?;
        assert!(!on_disk.exists());
        storage.delete(&stored.url).await?;
        Ok(())
    }

    #[tokio::test]
    async fn local_storage_refuses_foreign_urls() -> Result<()> {
        let dir = tempdir()?;
        let storage = LocalBlobStorage::new(dir.path(), "/media")?;
        assert!(storage.delete("/media/../secret").await.is_err());
        assert!(storage.delete("https://elsewhere/x.png").await.is_err());
        assert!(storage.resolve("../etc/passwd").is_none());
        assert!(storage.resolve("").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn mp4_duration_is_read_from_movie_header() -> Result<()> {
        let dir = tempdir()?;
        let storage = LocalBlobStorage::new(dir.path(), "/media")?;
        let upload =
            UploadedFile::from_bytes(&sample_mp4(1000, 42_400), Some("clip.mp4"), Some("video/mp4")).await?;
        let stored = storage.upload(&upload).await?;
        let duration = stored.duration.expect("duration");
        assert!((duration - 42.4).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn probe_returns_none_without_movie_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("raw.bin");
        let mut bytes = 8u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"free");
        std::fs::write(&path, bytes)?;
        assert_eq!(probe_mp4_duration(&path).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn probe_rejects_oversized_box_without_panicking() -> Result<()> {
        let dir = tempdir()?;
        let mut bytes = 8u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"free");
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(b"skip");
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        let path = dir.path().join("hostile.mp4");
        std::fs::write(&path, &bytes)?;
        assert!(probe_mp4_duration(&path).await.is_err());

        let storage = LocalBlobStorage::new(dir.path().join("media"), "/media")?;
        let upload = UploadedFile::from_bytes(&bytes, Some("hostile.mp4"), Some("video/mp4")).await?;
        let stored = storage.upload(&upload).await?;
        assert_eq!(stored.duration, None);
        Ok(())
    }

    #[tokio::test]
    async fn zero_timescale_has_no_duration() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("still.mp4");
        std::fs::write(&path, sample_mp4(0, 500))?;
        assert_eq!(probe_mp4_duration(&path).await?, None);
        Ok(())
    }
}
