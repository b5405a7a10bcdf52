//! Configuration (SPEC_FULL.md §2.1, §6): the options bag the consumer passes in, plus a
//! richer internal config aggregating timing policy and default-loader tuning, the same
//! split the grounding engine draws between its public options and its `HlsConfig`.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) hls-walker/0.1";

/// The options bag recognized at construction (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Base directory for relative filesystem URLs; defaults to the process working directory.
    pub root_path: Option<PathBuf>,
    /// If true, segment data is delivered uninterpreted; otherwise byte-ranges are applied.
    pub raw_response: bool,
    /// Seconds between unchanged-master refetches.
    pub master_playlist_timeout: Duration,
    /// Bounds concurrent subresource fetches (D4).
    pub max_concurrent_fetches: usize,
    /// Extra headers forwarded to the default HTTP loader.
    pub headers: Vec<(String, String)>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            root_path: None,
            raw_response: false,
            master_playlist_timeout: Duration::from_secs(30),
            max_concurrent_fetches: 16,
            headers: Vec::new(),
        }
    }
}

/// Refresh-cadence policy (C4), split out so it's unit-testable without the rest of the
/// engine.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    pub master_playlist_timeout: Duration,
}

impl RefreshPolicy {
    pub fn from_options(opts: &WalkOptions) -> Self {
        Self {
            master_playlist_timeout: opts.master_playlist_timeout,
        }
    }

    /// C4: master playlist unchanged, or requiring a reload because a referenced variant
    /// or rendition is still pending/live.
    pub fn master_refresh_delay(&self) -> Duration {
        self.master_playlist_timeout
    }

    /// C4: media playlist still live (no endlist, not VOD).
    pub fn media_live_refresh_delay(&self, target_duration: f64) -> Duration {
        Duration::from_secs_f64(target_duration.max(0.0))
    }

    /// C4: media playlist refetched but byte-identical to the previous version.
    pub fn media_unchanged_refresh_delay(&self, target_duration: f64) -> Duration {
        Duration::from_secs_f64((target_duration * 0.5).max(0.0))
    }
}

/// Default-loader HTTP client tuning, grounded on the grounding engine's `DownloaderConfig`.
#[derive(Debug, Clone)]
pub struct HttpLoaderConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for HttpLoaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: Vec::new(),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(300),
            retry_max_delay: Duration::from_secs(5),
        }
    }
}

/// Aggregated internal config for one walk.
#[derive(Debug, Clone, Default)]
pub struct WalkConfig {
    pub options: WalkOptions,
    pub http: HttpLoaderConfig,
}

impl WalkConfig {
    pub fn new(options: WalkOptions) -> Self {
        let mut http = HttpLoaderConfig::default();
        http.headers = options.headers.clone();
        Self { options, http }
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::from_options(&self.options)
    }
}
