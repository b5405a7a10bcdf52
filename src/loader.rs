//! The loader contract (SPEC_FULL.md §6) plus one concrete implementation so the crate is
//! runnable standalone. The walk engine only ever depends on the [`Loader`] trait.

use std::future::Future;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use tracing::warn;

use crate::config::HttpLoaderConfig;
use crate::error::WalkError;
use crate::model::LoadedResource;

/// Per-call loader options, mirroring the consumed contract in SPEC_FULL.md §6
/// (`{noCache?, readAsBuffer?, rawResponse?}`).
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub no_cache: bool,
    pub read_as_buffer: bool,
    /// When true, the caller wants the fetched bytes uninterpreted — byte-range slicing is
    /// the caller's job, not the loader's. The walk engine itself applies slicing downstream
    /// (`model::apply_response_mode`); this flag only controls what the loader hands back.
    pub raw_response: bool,
}

/// The injected fetcher. Out of scope for the walk engine itself — only this trait's
/// shape is part of the engine's contract.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, url: &str, opts: LoadOptions) -> Result<LoadedResource, WalkError>;
}

/// Default loader: HTTP(S) via `reqwest`, `file://`/bare paths via `tokio::fs`, resolved
/// against `root_path` when relative. Retrying here is a loader-local implementation
/// detail (SPEC_FULL.md §7) — the walk engine never assumes it.
pub struct DefaultLoader {
    client: reqwest::Client,
    config: HttpLoaderConfig,
    root_path: PathBuf,
}

impl DefaultLoader {
    pub fn new(config: HttpLoaderConfig, root_path: Option<PathBuf>) -> Result<Self, WalkError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone());
        for (name, value) in &config.headers {
            builder = builder.default_headers({
                let mut map = reqwest::header::HeaderMap::new();
                if let (Ok(name), Ok(value)) = (
                    reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                    reqwest::header::HeaderValue::from_str(value),
                ) {
                    map.insert(name, value);
                }
                map
            });
        }
        let client = builder.build().map_err(|e| WalkError::Internal {
            reason: format!("failed to build HTTP client: {e}"),
        })?;
        Ok(Self {
            client,
            config,
            root_path: root_path.unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    async fn load_http(&self, url: &str) -> Result<LoadedResource, WalkError> {
        retry_with_backoff(&self.config, url, || async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| crate::error::reqwest_err(url, e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(WalkError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            let mime_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let data = response
                .bytes()
                .await
                .map_err(|e| crate::error::reqwest_err(url, e))?;
            Ok(LoadedResource { data, mime_type })
        })
        .await
    }

    async fn load_file(&self, path: &Path) -> Result<LoadedResource, WalkError> {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_path.join(path)
        };
        let data = tokio::fs::read(&resolved)
            .await
            .map_err(|e| WalkError::Io {
                path: resolved.display().to_string(),
                reason: e.to_string(),
            })?;
        let mime_type = guess_mime_type(&resolved);
        Ok(LoadedResource {
            data: Bytes::from(data),
            mime_type,
        })
    }
}

#[async_trait]
impl Loader for DefaultLoader {
    async fn load(&self, url: &str, _opts: LoadOptions) -> Result<LoadedResource, WalkError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.load_http(url).await
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            self.load_file(Path::new(path)).await
        }
    }
}

fn guess_mime_type(path: &Path) -> Option<String> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => Some("application/vnd.apple.mpegurl".to_string()),
        Some("ts") => Some("video/mp2t".to_string()),
        Some("mp4" | "m4s") => Some("video/mp4".to_string()),
        Some("json") => Some("application/json".to_string()),
        _ => None,
    }
}

/// Exponential backoff with jitter, grounded on the grounding engine's `retry.rs`. This is
/// purely an internal detail of [`DefaultLoader`]; the walk engine has no retry policy of
/// its own.
async fn retry_with_backoff<F, Fut>(
    config: &HttpLoaderConfig,
    url: &str,
    mut operation: F,
) -> Result<LoadedResource, WalkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<LoadedResource, WalkError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(resource) => return Ok(resource),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let delay = delay_for_attempt(config, attempt);
                warn!(url, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient loader error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn delay_for_attempt(config: &HttpLoaderConfig, attempt: u32) -> std::time::Duration {
    let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let exp_delay = config
        .retry_base_delay
        .checked_mul(multiplier)
        .unwrap_or(config.retry_max_delay);
    let capped = exp_delay.min(config.retry_max_delay);
    let jitter_ms = rand::rng().random_range(0..50u64);
    (capped + std::time::Duration::from_millis(jitter_ms)).min(config.retry_max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_caps_at_max() {
        let config = HttpLoaderConfig {
            max_retries: 10,
            retry_base_delay: std::time::Duration::from_millis(500),
            retry_max_delay: std::time::Duration::from_secs(2),
            ..Default::default()
        };
        let delay = delay_for_attempt(&config, 10);
        assert!(delay <= std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn file_loader_reads_relative_to_root() {
        let dir = tempfile_dir();
        let file_path = dir.join("playlist.m3u8");
        tokio::fs::write(&file_path, b"#EXTM3U\n").await.unwrap();
        let loader = DefaultLoader::new(HttpLoaderConfig::default(), Some(dir)).unwrap();
        let resource = loader
            .load("playlist.m3u8", LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(&resource.data[..], b"#EXTM3U\n");
        assert_eq!(resource.mime_type.as_deref(), Some("application/vnd.apple.mpegurl"));
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "hls-walker-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
