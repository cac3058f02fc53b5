//! Cloudinary-backed [`BlobStore`].
//!
//! Talks to the Cloudinary REST API directly rather than through an SDK:
//! uploads and destroys go to the upload API with SHA-256 signed parameters,
//! probes go to the admin API with basic auth.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::blobstore::{
    BlobInfo, BlobKind, BlobStore, DEFAULT_MAX_UPLOAD_BYTES, MEDIA_FOLDER, UploadRequest,
    UploadedBlob,
};

const API_BASE: &str = "https://api.cloudinary.com/v1_1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials and tuning for a [`CloudinaryStore`].
#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    /// Folder every asset is uploaded under.
    pub folder: String,
    /// Upload bodies above this many bytes are rejected without contacting
    /// Cloudinary.
    pub max_upload_bytes: usize,
}

impl CloudinaryConfig {
    pub fn new(cloud_name: &str, api_key: &str, api_secret: &str) -> Self {
        Self {
            cloud_name: cloud_name.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            folder: MEDIA_FOLDER.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Reads `CLOUDINARY_CLOUD_NAME`, `CLOUDINARY_API_KEY` and
    /// `CLOUDINARY_API_SECRET`, plus the optional `MAX_FILE_SIZE` cap in
    /// bytes.
    pub fn from_env() -> Result<Self> {
        let cloud_name =
            std::env::var("CLOUDINARY_CLOUD_NAME").context("CLOUDINARY_CLOUD_NAME is not set")?;
        let api_key =
            std::env::var("CLOUDINARY_API_KEY").context("CLOUDINARY_API_KEY is not set")?;
        let api_secret =
            std::env::var("CLOUDINARY_API_SECRET").context("CLOUDINARY_API_SECRET is not set")?;

        let mut config = Self::new(&cloud_name, &api_key, &api_secret);
        if let Ok(raw) = std::env::var("MAX_FILE_SIZE") {
            config.max_upload_bytes = raw.parse().context("MAX_FILE_SIZE must be a byte count")?;
        }
        Ok(config)
    }
}

/// [`BlobStore`] that keeps asset bytes in a Cloudinary cloud.
pub struct CloudinaryStore {
    client: Client,
    config: CloudinaryConfig,
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create reqwest client");
        Self { client, config }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(CloudinaryConfig::from_env()?))
    }

    fn upload_url(&self, kind: BlobKind) -> String {
        format!(
            "{API_BASE}/{}/{}/upload",
            self.config.cloud_name,
            kind.as_path_segment()
        )
    }

    fn destroy_url(&self, kind: BlobKind) -> String {
        format!(
            "{API_BASE}/{}/{}/destroy",
            self.config.cloud_name,
            kind.as_path_segment()
        )
    }

    fn resource_url(&self, kind: BlobKind, blob_id: &str) -> String {
        format!(
            "{API_BASE}/{}/resources/{}/upload/{blob_id}",
            self.config.cloud_name,
            kind.as_path_segment()
        )
    }

    fn signature(&self, params: &[(&str, &str)]) -> String {
        sign_params(params, &self.config.api_secret)
    }
}

#[async_trait]
impl BlobStore for CloudinaryStore {
    fn max_upload_bytes(&self) -> usize {
        self.config.max_upload_bytes
    }

    async fn upload(&self, request: UploadRequest) -> Result<UploadedBlob> {
        let UploadRequest {
            file_name,
            content_type,
            kind,
            bytes,
        } = request;
        let body_len = bytes.len();

        let public_id = Uuid::new_v4().to_string();
        let timestamp = unix_timestamp();
        let signature = self.signature(&[
            ("folder", &self.config.folder),
            ("public_id", &public_id),
            ("timestamp", &timestamp),
        ]);

        let mut file = Part::bytes(bytes).file_name(file_name);
        if let Some(content_type) = &content_type {
            file = file
                .mime_str(content_type)
                .with_context(|| format!("invalid content type {content_type:?}"))?;
        }
        let form = Form::new()
            .text("api_key", self.config.api_key.clone())
            .text("folder", self.config.folder.clone())
            .text("public_id", public_id)
            .text("signature", signature)
            .text("signature_algorithm", "sha256")
            .text("timestamp", timestamp)
            .part("file", file);

        let response = self
            .client
            .post(self.upload_url(kind))
            .multipart(form)
            .send()
            .await
            .context("Cloudinary upload request failed")?;
        let uploaded: UploadResponse = read_json(response, "upload").await?;

        Ok(UploadedBlob {
            blob_id: uploaded.public_id,
            url: uploaded.secure_url,
            kind,
            format: uploaded.format,
            size: uploaded.bytes.unwrap_or(body_len as i64),
        })
    }

    async fn delete(&self, blob_id: &str, kind: BlobKind) -> Result<bool> {
        let timestamp = unix_timestamp();
        let signature = self.signature(&[
            ("invalidate", "true"),
            ("public_id", blob_id),
            ("timestamp", &timestamp),
        ]);
        let form = [
            ("api_key", self.config.api_key.as_str()),
            ("invalidate", "true"),
            ("public_id", blob_id),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
            ("timestamp", timestamp.as_str()),
        ];

        let response = self
            .client
            .post(self.destroy_url(kind))
            .form(&form)
            .send()
            .await
            .context("Cloudinary destroy request failed")?;
        let destroyed: DestroyResponse = read_json(response, "destroy").await?;
        Ok(destroyed.result == "ok")
    }

    async fn info(&self, blob_id: &str, kind: BlobKind) -> Result<Option<BlobInfo>> {
        let response = self
            .client
            .get(self.resource_url(kind, blob_id))
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .send()
            .await
            .context("Cloudinary resource request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resource: ResourceResponse = read_json(response, "resource lookup").await?;

        Ok(Some(BlobInfo {
            format: resource.format,
            size: resource.bytes,
            url: resource.secure_url,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
    format: Option<String>,
    bytes: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    format: Option<String>,
    bytes: Option<i64>,
    secure_url: Option<String>,
}

async fn read_json<T>(response: reqwest::Response, what: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        bail!("Cloudinary {what} returned {status}: {detail}");
    }
    response
        .json()
        .await
        .with_context(|| format!("Cloudinary {what} returned an unreadable body"))
}

/// Cloudinary request signing: parameters sorted by name, joined as
/// `key=value` pairs with `&`, the API secret appended, the whole string
/// hashed with SHA-256 and hex encoded.
fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by_key(|&(name, _)| name);
    let joined = sorted
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn unix_timestamp() -> String {
    Utc::now().timestamp().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CloudinaryStore {
        CloudinaryStore::new(CloudinaryConfig::new("demo", "key123", "secret456"))
    }

    #[test]
    fn request_urls_follow_the_cloudinary_layout() {
        let store = store();
        assert_eq!(
            store.upload_url(BlobKind::Image),
            "https://api.cloudinary.com/v1_1/demo/image/upload"
        );
        assert_eq!(
            store.destroy_url(BlobKind::Video),
            "https://api.cloudinary.com/v1_1/demo/video/destroy"
        );
        assert_eq!(
            store.resource_url(BlobKind::Raw, "storyflow_media/abc"),
            "https://api.cloudinary.com/v1_1/demo/resources/raw/upload/storyflow_media/abc"
        );
    }

    #[test]
    fn signatures_match_the_documented_scheme() {
        let signature = sign_params(
            &[
                ("folder", "storyflow_media"),
                ("public_id", "abc"),
                ("timestamp", "1700000000"),
            ],
            "secret456",
        );
        assert_eq!(
            signature,
            "27ca9e7ac5e0876307ec1354d054f60e81150c2fa90e51fc7cfc8a17430a98c7"
        );
    }

    #[test]
    fn signatures_are_order_independent() {
        let forward = sign_params(&[("public_id", "abc"), ("timestamp", "1700000000")], "shh");
        let reversed = sign_params(&[("timestamp", "1700000000"), ("public_id", "abc")], "shh");
        assert_eq!(forward, reversed);
    }

    #[test]
    fn config_defaults_cover_folder_and_cap() {
        let config = CloudinaryConfig::new("demo", "key123", "secret456");
        assert_eq!(config.folder, MEDIA_FOLDER);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(CloudinaryStore::new(config).max_upload_bytes(), DEFAULT_MAX_UPLOAD_BYTES);
    }
}
