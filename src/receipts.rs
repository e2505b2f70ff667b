//! Receipts
//!
//! Receipts are stored either inline as `data:<mime>;base64,<payload>` or as an
//! external URL. Uploads are identified by the SHA-256 of their raw bytes so a
//! second submission of the same file for the same owner can be rejected.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use crate::models::StoredReceipt;

/// A file the bot or web client attaches to an expense, or sends back
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Hex SHA-256 of the raw bytes
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.bytes))
    }

    /// Build from base64 payload, as received over the JSON API
    pub fn from_base64(filename: &str, content_type: Option<&str>, data: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(data.trim())
            .context("Attachment is not valid base64")?;
        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(filename));
        Ok(Self {
            filename: filename.to_string(),
            content_type,
            bytes,
        })
    }

    /// Stored form of this file when it is an expense receipt
    pub fn to_stored_receipt(&self) -> StoredReceipt {
        StoredReceipt {
            reference: self.to_data_url(),
            filename: Some(self.filename.clone()),
            hash: self.content_hash(),
        }
    }
}

/// Content type from a filename, `application/octet-stream` when unknown
pub fn guess_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Decode a `data:<mime>;base64,<payload>` URL into (mime, bytes)
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow::anyhow!("Not a data URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("Data URL has no payload"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow::anyhow!("Only base64 data URLs are supported"))?;
    let bytes = STANDARD
        .decode(payload.trim())
        .context("Data URL payload is not valid base64")?;
    let mime = if mime.is_empty() {
        "application/octet-stream".to_string()
    } else {
        mime.to_string()
    };
    Ok((mime, bytes))
}

/// Retrieves stored receipts in either form
#[derive(Clone)]
pub struct ReceiptFetcher {
    client: Client,
}

impl ReceiptFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Load receipt bytes with their content type
    pub async fn fetch(&self, reference: &str, filename: Option<&str>) -> Result<Attachment> {
        if reference.starts_with("data:") {
            let (content_type, bytes) = decode_data_url(reference)?;
            return Ok(Attachment {
                filename: filename
                    .map(str::to_string)
                    .unwrap_or_else(|| default_filename(&content_type)),
                content_type,
                bytes,
            });
        }

        if !(reference.starts_with("http://") || reference.starts_with("https://")) {
            anyhow::bail!("Unsupported receipt reference");
        }

        debug!("Fetching external receipt: {}", reference);
        let response = self.client.get(reference).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Receipt download failed with status {}", response.status());
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        let filename = filename
            .map(str::to_string)
            .or_else(|| {
                reference
                    .rsplit('/')
                    .next()
                    .map(|s| s.split('?').next().unwrap_or(s).to_string())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| "receipt".to_string());
        let content_type = header_type.unwrap_or_else(|| guess_content_type(&filename));

        Ok(Attachment {
            filename,
            content_type,
            bytes,
        })
    }
}

impl Default for ReceiptFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn default_filename(content_type: &str) -> String {
    let ext = mime_guess::get_mime_extensions_str(content_type)
        .and_then(|exts| exts.first())
        .copied()
        .unwrap_or("bin");
    format!("receipt.{}", ext)
}
