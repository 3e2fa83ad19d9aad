//! FrameSource - Candidate Frame Acquisition
//!
//! ## Responsibilities
//!
//! - Polling mode: pull one still from a rotating/selectable pool on disk
//! - Streaming mode: pull sequential frames from a camera HTTP endpoint,
//!   staged through a scoped temporary file before decoding
//!
//! Every frame is converted to 8-bit grayscale before it reaches the
//! occupancy engine. Source failures are recoverable; the detection loop
//! waits and retries rather than terminating.

use crate::error::{Error, Result};
use async_trait::async_trait;
use image::GrayImage;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Image extensions recognized when scanning the still pool
const POOL_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// HTTP fetch timeout for one streamed frame
const STREAM_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A source of candidate frames for the detection loop
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Acquire the next candidate frame as grayscale
    async fn next_frame(&mut self) -> Result<GrayImage>;

    /// Source mode name for logs ("polling" or "streaming")
    fn mode(&self) -> &'static str;
}

/// Decode a grayscale frame from raw encoded bytes
fn decode_grayscale(bytes: &[u8], origin: &str) -> Result<GrayImage> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| Error::FrameSource(format!("cannot decode {}: {}", origin, e)))?;
    Ok(decoded.to_luma8())
}

/// Load a grayscale image from disk (reference image, pool stills)
pub async fn load_grayscale(path: &Path) -> Result<GrayImage> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::FrameSource(format!("cannot read {}: {}", path.display(), e)))?;
    decode_grayscale(&bytes, &path.display().to_string())
}

/// Polling-mode source: a small pool of stills on disk.
///
/// Each tick serves a random member of the pool unless an index has been
/// pinned, mirroring a camera that is repositioned between polls.
#[derive(Debug)]
pub struct StillPool {
    paths: Vec<PathBuf>,
    selected: Option<usize>,
}

impl StillPool {
    /// Scan `dir` for stills. Fails when the pool is empty.
    pub fn new(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| Error::FrameSource(format!("cannot scan {}: {}", dir.display(), e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| POOL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(Error::FrameSource(format!(
                "still pool {} contains no images",
                dir.display()
            )));
        }

        Ok(Self {
            paths,
            selected: None,
        })
    }

    /// Pin the pool to one still, or return to random rotation with `None`
    pub fn select(&mut self, index: Option<usize>) -> Result<()> {
        if let Some(idx) = index {
            if idx >= self.paths.len() {
                return Err(Error::Validation(format!(
                    "still index {} out of range (pool size {})",
                    idx,
                    self.paths.len()
                )));
            }
        }
        self.selected = index;
        Ok(())
    }

    /// Number of stills in the pool
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[async_trait]
impl FrameSource for StillPool {
    async fn next_frame(&mut self) -> Result<GrayImage> {
        let index = match self.selected {
            Some(idx) => idx,
            None => rand::thread_rng().gen_range(0..self.paths.len()),
        };
        load_grayscale(&self.paths[index]).await
    }

    fn mode(&self) -> &'static str {
        "polling"
    }
}

/// Streaming-mode source: sequential frames from a camera HTTP endpoint.
///
/// Fetched bytes are staged through a scoped temporary file and re-read for
/// decoding; the file is removed on every exit path, including errors. A
/// fetch failure surfaces as a recoverable source error and the loop
/// reconnects on the next tick.
pub struct HttpStream {
    client: reqwest::Client,
    url: String,
    temp_dir: PathBuf,
}

impl HttpStream {
    pub fn new(url: String, temp_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&temp_dir)?;
        let client = reqwest::Client::builder()
            .timeout(STREAM_FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url,
            temp_dir,
        })
    }
}

#[async_trait]
impl FrameSource for HttpStream {
    async fn next_frame(&mut self) -> Result<GrayImage> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::FrameSource(format!("stream fetch failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::FrameSource(format!(
                "stream returned status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::FrameSource(format!("stream body failed: {}", e)))?;

        // Scoped staging file; dropped (and deleted) on every path below
        let staged = tempfile::Builder::new()
            .prefix("frame-")
            .suffix(".jpg")
            .tempfile_in(&self.temp_dir)?;
        tokio::fs::write(staged.path(), &bytes).await?;
        let raw = tokio::fs::read(staged.path()).await?;

        decode_grayscale(&raw, &self.url)
    }

    fn mode(&self) -> &'static str {
        "streaming"
    }
}
