//! Trait abstraction over the remote blob store that holds media assets.
//!
//! The catalog in Postgres only keeps metadata; the bytes live behind a
//! [`BlobStore`]. Production uses the Cloudinary-backed implementation, tests
//! and local development use [`MemoryBlobStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Folder prefix under which every asset of this service is stored.
pub const MEDIA_FOLDER: &str = "storyflow_media";

/// Upload cap applied when a store does not configure its own.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Resource classes the blob store distinguishes. Stores file audio under
/// [`BlobKind::Video`]; anything unrecognized is [`BlobKind::Raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Image,
    Video,
    Raw,
}

/// Probe order used when the stored kind of an asset is unknown.
pub const CANDIDATE_KINDS: [BlobKind; 3] = [BlobKind::Image, BlobKind::Video, BlobKind::Raw];

impl BlobKind {
    pub const fn as_path_segment(self) -> &'static str {
        match self {
            BlobKind::Image => "image",
            BlobKind::Video => "video",
            BlobKind::Raw => "raw",
        }
    }

    /// Map an HTTP content type onto the store's resource classes.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(value) if value.starts_with("image/") => BlobKind::Image,
            Some(value) if value.starts_with("video/") => BlobKind::Video,
            Some(value) if value.starts_with("audio/") => BlobKind::Video,
            _ => BlobKind::Raw,
        }
    }
}

/// A file body handed to the store for upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: Option<String>,
    pub kind: BlobKind,
    pub bytes: Vec<u8>,
}

/// What the store reports back after accepting an upload.
#[derive(Debug, Clone)]
pub struct UploadedBlob {
    pub blob_id: String,
    pub url: String,
    pub kind: BlobKind,
    pub format: Option<String>,
    pub size: i64,
}

/// Metadata the store holds for an existing asset.
#[derive(Debug, Clone, Default)]
pub struct BlobInfo {
    pub format: Option<String>,
    pub size: Option<i64>,
    pub url: Option<String>,
}

/// Remote storage operations the media pipeline depends on.
///
/// Implementations report transport problems as errors; how lenient to be
/// about a failed probe or delete is decided by the caller, not here.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Largest upload body the store accepts, in bytes. Callers check this
    /// before handing bytes to [`BlobStore::upload`].
    fn max_upload_bytes(&self) -> usize {
        DEFAULT_MAX_UPLOAD_BYTES
    }

    /// Store a new asset under a fresh id and return where it landed.
    async fn upload(&self, request: UploadRequest) -> Result<UploadedBlob>;

    /// Remove an asset. `Ok(false)` means the store did not confirm removal,
    /// for example because nothing lives under that id and kind.
    async fn delete(&self, blob_id: &str, kind: BlobKind) -> Result<bool>;

    /// Look up an asset. `Ok(None)` means the store has no asset under that
    /// id and kind.
    async fn info(&self, blob_id: &str, kind: BlobKind) -> Result<Option<BlobInfo>>;
}

/// Format label of an uploaded file, taken from its extension.
fn file_format(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

#[derive(Debug, Clone)]
struct StoredBlob {
    kind: BlobKind,
    format: Option<String>,
    bytes: Vec<u8>,
    url: String,
}

/// In-memory implementation of [`BlobStore`] for tests and local development.
///
/// Keeps blobs in a `HashMap` behind an async `RwLock`, records every delete
/// it is asked for, and can be told to fail uploads, deletes or lookups to
/// exercise error paths.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
    deletes: RwLock<Vec<(String, BlobKind)>>,
    upload_limit: AtomicUsize,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
    fail_info: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            deletes: RwLock::new(Vec::new()),
            upload_limit: AtomicUsize::new(DEFAULT_MAX_UPLOAD_BYTES),
            fail_uploads: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_info: AtomicBool::new(false),
        }
    }

    /// Place a blob under a known id, bypassing upload.
    pub async fn seed_blob(&self, blob_id: impl Into<String>, kind: BlobKind, bytes: &[u8]) {
        let blob_id = blob_id.into();
        let url = memory_url(&blob_id, kind);
        self.blobs.write().await.insert(
            blob_id,
            StoredBlob {
                kind,
                format: None,
                bytes: bytes.to_vec(),
                url,
            },
        );
    }

    pub async fn contains(&self, blob_id: &str) -> bool {
        self.blobs.read().await.contains_key(blob_id)
    }

    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Every `(blob_id, kind)` pair a delete was attempted for, in order.
    pub async fn delete_attempts(&self) -> Vec<(String, BlobKind)> {
        self.deletes.read().await.clone()
    }

    /// Tighten the upload cap, so size rejections can be exercised without
    /// building a hundred-megabyte body.
    pub fn set_upload_limit(&self, limit: usize) {
        self.upload_limit.store(limit, Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_info(&self, fail: bool) {
        self.fail_info.store(fail, Ordering::SeqCst);
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn memory_url(blob_id: &str, kind: BlobKind) -> String {
    format!("memory://{}/{}", kind.as_path_segment(), blob_id)
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn max_upload_bytes(&self) -> usize {
        self.upload_limit.load(Ordering::SeqCst)
    }

    async fn upload(&self, request: UploadRequest) -> Result<UploadedBlob> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store refused upload"));
        }

        let blob_id = format!("{}/{}", MEDIA_FOLDER, Uuid::new_v4().simple());
        let url = memory_url(&blob_id, request.kind);
        let format = file_format(&request.file_name);
        let size = request.bytes.len() as i64;
        self.blobs.write().await.insert(
            blob_id.clone(),
            StoredBlob {
                kind: request.kind,
                format: format.clone(),
                bytes: request.bytes,
                url: url.clone(),
            },
        );

        Ok(UploadedBlob {
            blob_id,
            url,
            kind: request.kind,
            format,
            size,
        })
    }

    async fn delete(&self, blob_id: &str, kind: BlobKind) -> Result<bool> {
        self.deletes.write().await.push((blob_id.to_string(), kind));

        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store refused delete of {blob_id}"));
        }

        let mut blobs = self.blobs.write().await;
        match blobs.get(blob_id) {
            Some(stored) if stored.kind == kind => {
                blobs.remove(blob_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn info(&self, blob_id: &str, kind: BlobKind) -> Result<Option<BlobInfo>> {
        if self.fail_info.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store refused lookup of {blob_id}"));
        }

        let blobs = self.blobs.read().await;
        Ok(blobs
            .get(blob_id)
            .filter(|stored| stored.kind == kind)
            .map(|stored| BlobInfo {
                format: stored.format.clone(),
                size: Some(stored.bytes.len() as i64),
                url: Some(stored.url.clone()),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_come_from_the_file_name() {
        assert_eq!(super::file_format("clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(super::file_format("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(super::file_format("noext"), None);
        assert_eq!(super::file_format("trailing."), None);
    }

    #[test]
    fn content_types_map_to_store_kinds() {
        assert_eq!(
            BlobKind::from_content_type(Some("image/png")),
            BlobKind::Image
        );
        assert_eq!(
            BlobKind::from_content_type(Some("video/mp4")),
            BlobKind::Video
        );
        assert_eq!(
            BlobKind::from_content_type(Some("audio/mpeg")),
            BlobKind::Video
        );
        assert_eq!(
            BlobKind::from_content_type(Some("application/pdf")),
            BlobKind::Raw
        );
        assert_eq!(BlobKind::from_content_type(None), BlobKind::Raw);
    }

    #[tokio::test]
    async fn upload_then_info_then_delete() {
        let store = MemoryBlobStore::new();
        let uploaded = store
            .upload(UploadRequest {
                file_name: "clip.mp4".to_string(),
                content_type: Some("video/mp4".to_string()),
                kind: BlobKind::Video,
                bytes: vec![1, 2, 3, 4],
            })
            .await
            .unwrap();

        assert!(uploaded.blob_id.starts_with(MEDIA_FOLDER));
        assert_eq!(uploaded.kind, BlobKind::Video);
        assert_eq!(uploaded.format.as_deref(), Some("mp4"));
        assert_eq!(uploaded.size, 4);

        let info = store
            .info(&uploaded.blob_id, BlobKind::Video)
            .await
            .unwrap();
        assert_eq!(info.unwrap().size, Some(4));

        let deleted = store
            .delete(&uploaded.blob_id, BlobKind::Video)
            .await
            .unwrap();
        assert!(deleted);
        assert_eq!(store.blob_count().await, 0);
    }

    #[tokio::test]
    async fn info_misses_on_wrong_kind() {
        let store = MemoryBlobStore::new();
        store
            .seed_blob("storyflow_media/abc", BlobKind::Image, &[9, 9])
            .await;

        let info = store
            .info("storyflow_media/abc", BlobKind::Video)
            .await
            .unwrap();
        assert!(info.is_none());

        let info = store
            .info("storyflow_media/abc", BlobKind::Image)
            .await
            .unwrap();
        assert!(info.is_some());
    }

    #[tokio::test]
    async fn delete_of_unknown_blob_is_unconfirmed() {
        let store = MemoryBlobStore::new();
        let deleted = store
            .delete("storyflow_media/missing", BlobKind::Image)
            .await
            .unwrap();
        assert!(!deleted);
        assert_eq!(
            store.delete_attempts().await,
            vec![("storyflow_media/missing".to_string(), BlobKind::Image)]
        );
    }

    #[tokio::test]
    async fn failure_flags_surface_as_errors() {
        let store = MemoryBlobStore::new();
        store.seed_blob("storyflow_media/abc", BlobKind::Raw, &[1]).await;

        store.set_fail_info(true);
        assert!(store.info("storyflow_media/abc", BlobKind::Raw).await.is_err());

        store.set_fail_deletes(true);
        assert!(store.delete("storyflow_media/abc", BlobKind::Raw).await.is_err());

        store.set_fail_uploads(true);
        let result = store
            .upload(UploadRequest {
                file_name: "a.bin".to_string(),
                content_type: None,
                kind: BlobKind::Raw,
                bytes: vec![1],
            })
            .await;
        assert!(result.is_err());
    }
}
