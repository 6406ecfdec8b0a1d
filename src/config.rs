use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::{
    error::{Error, Result},
    probe::ProbeFailurePolicy,
    quality::QualityLevel,
    queue::PlayMode,
    retry::RetryPolicy,
};

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub quality: QualityLevel,
    pub mode: PlayMode,

    /// Minimum spacing between two playback requests.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_request_interval: Duration,

    pub fetch: RetryPolicy,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub unblock_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub content_length_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub manual_probe_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub placeholder_timeout: Duration,

    pub probe_batch_size: usize,
    pub probe_failure: ProbeFailurePolicy,

    pub placeholder_batch_size: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub placeholder_batch_spacing: Duration,
    /// Number of views whose ordered ID lists are remembered.
    pub id_list_capacity: usize,

    pub enrichment_concurrency: usize,
    pub cache_capacity: usize,

    /// Size assumed for unblocked streams when nothing better is known.
    pub unblock_fallback_size: u64,

    /// Remaining radio songs at which more are fetched.
    pub radio_refill_threshold: usize,

    /// Purchase link for paid albums; `{id}` is replaced by the song ID.
    pub purchase_url: Option<String>,

    pub user_agent: String,
    pub rate_limit_calls: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rate_limit_interval: Duration,

    /// Resolve the predicted next song in the background.
    pub preload: bool,
    pub predict_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        let app_name = env!("CARGO_PKG_NAME");
        let app_version = env!("CARGO_PKG_VERSION");

        Self {
            quality: QualityLevel::default(),
            mode: PlayMode::default(),

            min_request_interval: Duration::from_millis(200),

            fetch: RetryPolicy::default(),

            unblock_timeout: Duration::from_secs(8),
            content_length_timeout: Duration::from_secs(10),
            manual_probe_timeout: Duration::from_secs(20),
            placeholder_timeout: Duration::from_secs(8),

            probe_batch_size: 100,
            probe_failure: ProbeFailurePolicy::default(),

            placeholder_batch_size: 200,
            placeholder_batch_spacing: Duration::from_millis(1500),
            id_list_capacity: 16,

            enrichment_concurrency: 4,
            cache_capacity: 2048,

            unblock_fallback_size: 16 * 1024 * 1024,

            radio_refill_threshold: 1,

            purchase_url: None,

            user_agent: format!("{app_name}/{app_version} (Rust; {})", std::env::consts::OS),
            rate_limit_calls: 50,
            rate_limit_interval: Duration::from_secs(5),

            preload: true,
            predict_attempts: 10,
        }
    }
}

impl Config {
    /// Reads a configuration file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Checks values that would stall the engine.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when a batch size, capacity or attempt
    /// count is zero.
    pub fn validate(&self) -> Result<()> {
        let zeroes = [
            ("probe_batch_size", self.probe_batch_size),
            ("placeholder_batch_size", self.placeholder_batch_size),
            ("enrichment_concurrency", self.enrichment_concurrency),
            ("cache_capacity", self.cache_capacity),
            ("fetch.attempts", self.fetch.attempts as usize),
        ];
        if let Some((name, _)) = zeroes.iter().find(|(_, value)| *value == 0) {
            return Err(Error::invalid_argument(format!("{name} must not be zero")));
        }

        Ok(())
    }

    /// Purchase link for a paid song, if a template is configured.
    #[must_use]
    pub fn purchase_link(&self, id: &str) -> Option<url::Url> {
        let template = self.purchase_url.as_deref()?;
        let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
        let link = template.replace("{id}", &encoded);
        match url::Url::parse(&link) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("invalid purchase url {link}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            quality = "lossless"
            mode = "random"
            unblock_timeout = 4000

            [fetch]
            attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.quality, QualityLevel::Lossless);
        assert_eq!(config.mode, PlayMode::Random);
        assert_eq!(config.unblock_timeout, Duration::from_secs(4));
        assert_eq!(config.fetch.attempts, 5);
        assert_eq!(config.fetch.min_delay, Duration::from_millis(1200));
        assert_eq!(config.placeholder_batch_size, 200);
        assert_eq!(config.probe_failure, ProbeFailurePolicy::Open);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config = Config {
            probe_batch_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn builds_purchase_links() {
        let config = Config {
            purchase_url: Some("https://music.example.com/buy?song={id}".to_owned()),
            ..Config::default()
        };
        assert_eq!(
            config.purchase_link("12 3").unwrap().as_str(),
            "https://music.example.com/buy?song=12+3"
        );
        assert!(Config::default().purchase_link("1").is_none());
    }
}
