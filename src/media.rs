use anyhow::anyhow;
use sqlx::PgPool;

use crate::blobstore::{
    BlobKind, BlobStore, CANDIDATE_KINDS, MEDIA_FOLDER, UploadRequest, UploadedBlob,
};
use crate::db::{self, AssetSwap, NewMediaRecord};
use crate::error::{LibError, Result};
use crate::models::{
    AssetReplacement, MediaId, MediaKind, MediaRecord, ReplaceAssetPayload, UploadMediaPayload,
    UserId,
};

/// Store class used when pushing an asset of the given catalog kind.
fn blob_kind_for(kind: MediaKind) -> BlobKind {
    match kind {
        MediaKind::Image => BlobKind::Image,
        MediaKind::Video => BlobKind::Video,
        MediaKind::Audio => BlobKind::Video,
    }
}

/// Recover a blob id from a delivery URL by locating the service's asset
/// folder segment and taking the following segment without its extension,
/// ignoring any query string.
///
/// `https://cdn.example/image/upload/v123/storyflow_media/abc.jpg` resolves
/// to `storyflow_media/abc`; URLs that never pass through the folder are
/// underivable.
fn derive_blob_id(url: &str) -> Option<String> {
    let path = url.split('?').next().unwrap_or(url);
    let mut segments = path.split('/');
    while let Some(segment) = segments.next() {
        if segment != MEDIA_FOLDER {
            continue;
        }
        let file = segments.next()?;
        let stem = match file.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => file,
        };
        if stem.is_empty() {
            return None;
        }
        return Some(format!("{MEDIA_FOLDER}/{stem}"));
    }
    None
}

/// The blob id a record's asset lives under: the stored id when present,
/// otherwise derived from the delivery URL.
fn resolve_blob_id(record: &MediaRecord) -> Option<String> {
    record
        .blob_id
        .as_deref()
        .filter(|blob_id| !blob_id.is_empty())
        .map(str::to_string)
        .or_else(|| derive_blob_id(&record.url))
}

/// Reject bodies beyond the store's upload cap before anything is sent.
fn guard_upload_size(store: &dyn BlobStore, len: usize) -> Result<()> {
    let limit = store.max_upload_bytes();
    if len > limit {
        return Err(LibError::invalid(
            "File too large",
            anyhow!("upload of {len} bytes exceeds the {limit} byte limit"),
        ));
    }
    Ok(())
}

pub async fn upload_media(
    pool: &PgPool,
    store: &dyn BlobStore,
    actor: UserId,
    payload: UploadMediaPayload,
) -> Result<MediaRecord> {
    let definition = payload.normalize()?;
    guard_upload_size(store, definition.bytes.len())?;

    let uploaded = store
        .upload(UploadRequest {
            kind: BlobKind::from_content_type(definition.content_type.as_deref()),
            file_name: definition.file_name,
            content_type: definition.content_type,
            bytes: definition.bytes,
        })
        .await
        .map_err(|err| LibError::upstream("Failed to store media asset", err))?;

    db::insert_media(
        pool,
        actor,
        NewMediaRecord {
            title: definition.title,
            description: definition.description,
            size: uploaded.size,
            kind: definition.kind,
            ext: uploaded.format.unwrap_or_default(),
            url: uploaded.url,
            blob_id: Some(uploaded.blob_id),
            project_id: definition.project_id,
        },
    )
    .await
}

pub async fn delete_media(
    pool: &PgPool,
    store: &dyn BlobStore,
    actor: UserId,
    media_id: MediaId,
) -> Result<bool> {
    let record = db::load_accessible_media(pool, actor, media_id).await?;
    discard_remote_asset(store, &record).await;
    db::delete_media_row(pool, record.id).await
}

/// Best-effort removal of a record's asset from the store. Failures are
/// logged and never block the caller; the catalog row wins over the blob.
async fn discard_remote_asset(store: &dyn BlobStore, record: &MediaRecord) {
    let Some(blob_id) = resolve_blob_id(record) else {
        tracing::warn!(
            media_id = %record.id,
            url = %record.url,
            "no blob id for media record, skipping asset removal"
        );
        return;
    };

    let kind = blob_kind_for(record.kind);
    match store.delete(&blob_id, kind).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                media_id = %record.id,
                blob_id = %blob_id,
                "blob store did not confirm asset removal"
            );
        }
        Err(err) => {
            tracing::warn!(
                media_id = %record.id,
                blob_id = %blob_id,
                error = %err,
                "failed to remove asset for deleted media"
            );
        }
    }
}

/// Swap out the remote asset behind an existing record.
///
/// Resolves where the current asset lives, probes the store to learn its
/// kind, removes it, and only then uploads the replacement under a fresh id.
/// If the store never confirms removal of the old asset the replacement is
/// not uploaded and the record is left pointing at the original.
pub(crate) async fn swap_remote_asset(
    store: &dyn BlobStore,
    record: &MediaRecord,
    replacement: AssetReplacement,
) -> Result<UploadedBlob> {
    let old_blob_id = resolve_blob_id(record).ok_or_else(|| {
        LibError::invalid(
            "Cannot determine the stored asset for this media",
            anyhow!(
                "media {} has no blob id and url {:?} is underivable",
                record.id,
                record.url
            ),
        )
    })?;

    let mut detected = None;
    for kind in CANDIDATE_KINDS {
        match store.info(&old_blob_id, kind).await {
            Ok(Some(_)) => {
                detected = Some(kind);
                break;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    media_id = %record.id,
                    blob_id = %old_blob_id,
                    kind = kind.as_path_segment(),
                    error = %err,
                    "asset probe failed, treating as missing"
                );
            }
        }
    }

    let mut removed = false;
    match detected {
        Some(kind) => match store.delete(&old_blob_id, kind).await {
            Ok(confirmed) => removed = confirmed,
            Err(err) => {
                tracing::warn!(
                    media_id = %record.id,
                    blob_id = %old_blob_id,
                    kind = kind.as_path_segment(),
                    error = %err,
                    "failed to delete asset of known kind"
                );
            }
        },
        None => {
            for kind in CANDIDATE_KINDS {
                match store.delete(&old_blob_id, kind).await {
                    Ok(true) => {
                        removed = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(
                            media_id = %record.id,
                            blob_id = %old_blob_id,
                            kind = kind.as_path_segment(),
                            error = %err,
                            "failed to delete asset of unknown kind"
                        );
                    }
                }
            }
        }
    }

    if !removed {
        return Err(LibError::upstream(
            "Failed to remove the existing asset",
            anyhow!("blob {} was not confirmed deleted", old_blob_id),
        ));
    }

    store
        .upload(UploadRequest {
            kind: BlobKind::from_content_type(replacement.content_type.as_deref()),
            file_name: replacement.file_name,
            content_type: replacement.content_type,
            bytes: replacement.bytes,
        })
        .await
        .map_err(|err| LibError::upstream("Failed to store media asset", err))
}

pub async fn replace_asset(
    pool: &PgPool,
    store: &dyn BlobStore,
    actor: UserId,
    media_id: MediaId,
    payload: ReplaceAssetPayload,
) -> Result<MediaRecord> {
    let replacement = payload.normalize()?;
    let record = db::load_accessible_media(pool, actor, media_id).await?;
    guard_upload_size(store, replacement.bytes.len())?;

    let uploaded = swap_remote_asset(store, &record, replacement).await?;

    db::swap_media_asset(
        pool,
        record.id,
        AssetSwap {
            size: uploaded.size,
            ext: uploaded.format.unwrap_or_default(),
            url: uploaded.url,
            blob_id: uploaded.blob_id,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{
        blob_kind_for, derive_blob_id, guard_upload_size, resolve_blob_id, swap_remote_asset,
    };
    use crate::blobstore::{BlobKind, MemoryBlobStore};
    use crate::error::ErrorKind;
    use crate::models::{AssetReplacement, MediaId, MediaKind, MediaRecord, UserId};

    fn sample_record(blob_id: Option<&str>, url: &str) -> MediaRecord {
        MediaRecord {
            id: MediaId(Uuid::new_v4()),
            owner_id: UserId(Uuid::new_v4()),
            title: "Intro clip".to_string(),
            description: None,
            size: 2048,
            kind: MediaKind::Video,
            ext: "mp4".to_string(),
            url: url.to_string(),
            blob_id: blob_id.map(str::to_string),
            status: "active".to_string(),
            project_id: None,
            created_at: Default::default(),
            updated_at: Default::default(),
        }
    }

    fn sample_replacement() -> AssetReplacement {
        AssetReplacement {
            file_name: "next.png".to_string(),
            content_type: Some("image/png".to_string()),
            bytes: vec![7, 7, 7],
        }
    }

    #[test]
    fn oversized_bodies_are_rejected() {
        let store = MemoryBlobStore::new();
        store.set_upload_limit(2);

        let err = guard_upload_size(&store, 3).expect_err("cap should reject");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(guard_upload_size(&store, 2).is_ok());
    }

    #[test]
    fn audio_is_stored_as_video() {
        assert_eq!(blob_kind_for(MediaKind::Audio), BlobKind::Video);
        assert_eq!(blob_kind_for(MediaKind::Image), BlobKind::Image);
        assert_eq!(blob_kind_for(MediaKind::Video), BlobKind::Video);
    }

    #[test]
    fn blob_ids_derive_from_delivery_urls() {
        assert_eq!(
            derive_blob_id(
                "https://res.cloudinary.com/demo/image/upload/v1234567890/storyflow_media/oldid.jpg"
            ),
            Some("storyflow_media/oldid".to_string())
        );
        assert_eq!(
            derive_blob_id("https://cdn.example/storyflow_media/clip.mp4?sig=abc"),
            Some("storyflow_media/clip".to_string())
        );
        assert_eq!(
            derive_blob_id("https://cdn.example/storyflow_media/plain"),
            Some("storyflow_media/plain".to_string())
        );
    }

    #[test]
    fn underivable_urls_yield_nothing() {
        // No folder segment at all.
        assert_eq!(derive_blob_id("justafile.jpg"), None);
        // A foreign host that never passes through the service folder.
        assert_eq!(derive_blob_id("https://cdn.example/uploads/derived.mp4"), None);
        // The folder with nothing usable behind it.
        assert_eq!(derive_blob_id("https://cdn.example/storyflow_media/.jpg"), None);
        assert_eq!(derive_blob_id("https://cdn.example/storyflow_media"), None);
        assert_eq!(derive_blob_id(""), None);
    }

    #[test]
    fn stored_blob_id_wins_over_derivation() {
        let record = sample_record(
            Some("storyflow_media/stored"),
            "https://cdn.example/storyflow_media/derived.mp4",
        );
        assert_eq!(
            resolve_blob_id(&record),
            Some("storyflow_media/stored".to_string())
        );
    }

    #[test]
    fn empty_blob_id_falls_back_to_the_url() {
        let record = sample_record(Some(""), "https://cdn.example/storyflow_media/derived.mp4");
        assert_eq!(
            resolve_blob_id(&record),
            Some("storyflow_media/derived".to_string())
        );
    }

    #[tokio::test]
    async fn replacement_deletes_the_detected_kind_once() {
        let store = MemoryBlobStore::new();
        store
            .seed_blob("storyflow_media/old", BlobKind::Video, &[1, 2])
            .await;
        let record = sample_record(Some("storyflow_media/old"), "https://cdn.example/x/old.mp4");

        let uploaded = swap_remote_asset(&store, &record, sample_replacement())
            .await
            .expect("replacement should succeed");

        assert!(!store.contains("storyflow_media/old").await);
        assert!(store.contains(&uploaded.blob_id).await);
        assert_ne!(uploaded.blob_id, "storyflow_media/old");
        assert_eq!(uploaded.format.as_deref(), Some("png"));
        assert_eq!(uploaded.size, 3);
        // One targeted delete, no blind sweep.
        assert_eq!(
            store.delete_attempts().await,
            vec![("storyflow_media/old".to_string(), BlobKind::Video)]
        );
    }

    #[tokio::test]
    async fn unknown_kind_falls_back_to_a_blind_sweep() {
        let store = MemoryBlobStore::new();
        store
            .seed_blob("storyflow_media/old", BlobKind::Video, &[1, 2])
            .await;
        store.set_fail_info(true);
        let record = sample_record(Some("storyflow_media/old"), "https://cdn.example/x/old.mp4");

        let uploaded = swap_remote_asset(&store, &record, sample_replacement())
            .await
            .expect("replacement should survive failed probes");

        assert!(store.contains(&uploaded.blob_id).await);
        // The sweep stops at the kind that confirmed removal.
        assert_eq!(
            store.delete_attempts().await,
            vec![
                ("storyflow_media/old".to_string(), BlobKind::Image),
                ("storyflow_media/old".to_string(), BlobKind::Video),
            ]
        );
    }

    #[tokio::test]
    async fn missing_asset_means_no_upload() {
        let store = MemoryBlobStore::new();
        let record = sample_record(Some("storyflow_media/gone"), "https://cdn.example/x/gone.mp4");

        let err = swap_remote_asset(&store, &record, sample_replacement())
            .await
            .expect_err("unconfirmed removal should fail");

        assert_eq!(err.kind, ErrorKind::Upstream);
        assert_eq!(store.blob_count().await, 0);
        // All three kinds were tried before giving up.
        assert_eq!(store.delete_attempts().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_delete_of_known_kind_stops_the_replacement() {
        let store = MemoryBlobStore::new();
        store
            .seed_blob("storyflow_media/old", BlobKind::Image, &[5])
            .await;
        store.set_fail_deletes(true);
        let record = sample_record(Some("storyflow_media/old"), "https://cdn.example/x/old.jpg");

        let err = swap_remote_asset(&store, &record, sample_replacement())
            .await
            .expect_err("failed delete should fail the replacement");

        assert_eq!(err.kind, ErrorKind::Upstream);
        // The old asset is still there and nothing new was uploaded.
        assert!(store.contains("storyflow_media/old").await);
        assert_eq!(store.blob_count().await, 1);
        assert_eq!(store.delete_attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_upload_after_removal_is_upstream() {
        let store = MemoryBlobStore::new();
        store
            .seed_blob("storyflow_media/old", BlobKind::Video, &[1])
            .await;
        store.set_fail_uploads(true);
        let record = sample_record(Some("storyflow_media/old"), "https://cdn.example/x/old.mp4");

        let err = swap_remote_asset(&store, &record, sample_replacement())
            .await
            .expect_err("failed upload should surface");

        assert_eq!(err.kind, ErrorKind::Upstream);
        assert_eq!(store.blob_count().await, 0);
    }

    #[tokio::test]
    async fn unresolvable_record_is_invalid_input() {
        let store = MemoryBlobStore::new();
        let record = sample_record(None, "opaque");

        let err = swap_remote_asset(&store, &record, sample_replacement())
            .await
            .expect_err("unresolvable asset should be rejected");

        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(store.delete_attempts().await.is_empty());
    }

    #[tokio::test]
    async fn discard_swallows_store_failures() {
        let store = MemoryBlobStore::new();
        store.set_fail_deletes(true);
        let record = sample_record(Some("storyflow_media/old"), "https://cdn.example/x/old.mp4");

        super::discard_remote_asset(&store, &record).await;

        assert_eq!(store.delete_attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn discard_uses_the_record_kind() {
        let store = MemoryBlobStore::new();
        store
            .seed_blob("storyflow_media/old", BlobKind::Video, &[1])
            .await;
        let record = sample_record(Some("storyflow_media/old"), "https://cdn.example/x/old.mp4");

        super::discard_remote_asset(&store, &record).await;

        assert!(!store.contains("storyflow_media/old").await);
        assert_eq!(
            store.delete_attempts().await,
            vec![("storyflow_media/old".to_string(), BlobKind::Video)]
        );
    }
}
