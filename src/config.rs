//! Engine configuration.
//!
//! Every setting has a default, so an absent or empty configuration file is
//! valid. Files are TOML:
//!
//! ```toml
//! [resolver]
//! workers = 4
//! timeout = 60
//!
//! [queue]
//! page_size = 10
//! history_limit = 0
//! removal = "first"
//!
//! [playback]
//! max_sink_failures = 3
//!
//! [usage]
//! path = "usage.jsonl"
//! ```

use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub queue: QueueConfig,
    pub playback: PlaybackConfig,
    pub usage: UsageConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Size of the worker pool that runs blocking resolver calls.
    pub workers: NonZeroUsize,

    /// Seconds a single resolver call may take; 0 waits forever.
    pub timeout: u64,
}

impl ResolverConfig {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
            timeout: 60,
        }
    }
}

/// What removing by a set of identifiers takes out of the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Removal {
    /// Only the first match in queue order.
    #[default]
    First,
    /// Every match.
    All,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub page_size: NonZeroUsize,

    /// Entries kept for going back; 0 keeps everything.
    pub history_limit: usize,

    pub removal: Removal,
}

impl QueueConfig {
    #[must_use]
    pub fn history_limit(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.history_limit)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            page_size: NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN),
            history_limit: 0,
            removal: Removal::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaybackConfig {
    /// Consecutive sink failures after which the driver gives up the sink.
    pub max_sink_failures: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_sink_failures: 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UsageConfig {
    /// JSON lines file to record requests to. Recording is off without it.
    pub path: Option<PathBuf>,
}

impl Config {
    /// Configuration files are small; refuse anything larger before reading.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file cannot be read, is too large, or is not
    /// a valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        trace!("{config:#?}");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.resolver.workers.get(), 4);
        assert_eq!(config.resolver.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.queue.page_size.get(), 10);
        assert_eq!(config.queue.history_limit(), None);
        assert_eq!(config.queue.removal, Removal::First);
        assert!(config.usage.path.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config: Config = r#"
            [resolver]
            workers = 8
            timeout = 0

            [queue]
            history_limit = 50
            removal = "all"

            [usage]
            path = "usage.jsonl"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.resolver.workers.get(), 8);
        assert_eq!(config.resolver.timeout(), None);
        assert_eq!(config.queue.page_size.get(), 10);
        assert_eq!(config.queue.history_limit().map(NonZeroUsize::get), Some(50));
        assert_eq!(config.queue.removal, Removal::All);
        assert_eq!(config.usage.path, Some(PathBuf::from("usage.jsonl")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for input in ["[resolver]\nworkers = 0", "[queue]\nshuffle = true", "volume = 3"] {
            let err = input.parse::<Config>().unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
        }
    }
}
