//! Album-art download and decode.
//!
//! Only JPEG, PNG and WebP are accepted. Bodies larger than `max_bytes` are
//! rejected before decoding and images wider or taller than `max_dimension`
//! are rejected by the decoder limits, so a corrupt or oversized image
//! fails cleanly instead of depending on decoder behaviour.

use futures_util::StreamExt;
use glance_proto::config::ArtworkConfig;
use glance_proto::protocol::Artwork;
use image::{ImageFormat, ImageReader, Limits};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ArtworkError {
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("image body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

const ACCEPTED_FORMATS: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

pub struct ArtworkFetcher {
    http: reqwest::Client,
    max_bytes: u64,
    max_dimension: u32,
}

impl ArtworkFetcher {
    pub fn new(config: &ArtworkConfig, timeout: Duration) -> Result<Self, ArtworkError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            max_bytes: config.max_bytes,
            max_dimension: config.max_dimension,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Artwork, ArtworkError> {
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtworkError::Status(status));
        }

        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(ArtworkError::TooLarge {
                limit: self.max_bytes,
            });
        }

        // Content-Length can be absent or wrong; enforce the cap while reading.
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(ArtworkError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes of artwork from {}", body.len(), url);
        self.decode(url, &body)
    }

    pub fn decode(&self, url: &str, bytes: &[u8]) -> Result<Artwork, ArtworkError> {
        if bytes.len() as u64 > self.max_bytes {
            return Err(ArtworkError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let format = image::guess_format(bytes).map_err(|_| ArtworkError::UnsupportedFormat)?;
        if !ACCEPTED_FORMATS.contains(&format) {
            return Err(ArtworkError::UnsupportedFormat);
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);

        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        reader.limits(limits);
        let rgba = reader.decode()?.to_rgba8();

        Ok(Artwork {
            url: url.to_string(),
            width: rgba.width(),
            height: rgba.height(),
            rgba: Arc::new(rgba.into_raw()),
        })
    }
}
