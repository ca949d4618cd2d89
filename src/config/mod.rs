use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MAX_RETRIES: u32 = 10;

/// What to do when a playlist member fails to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaylistFailurePolicy {
    #[default]
    SkipAndContinue,
    AbortOnFirstFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub max_delegation_depth: usize,
    pub playlist_failure_policy: PlaylistFailurePolicy,
    /// Bounded parallelism for sibling playlist members and format sources.
    pub concurrency_limit: usize,
    pub user_agent: String,
    pub timeout: u64,
    /// Attempts per request, backing off `2^attempt` seconds between them.
    pub retries: u32,
    pub plugin_dirs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_delegation_depth: 10,
            playlist_failure_policy: PlaylistFailurePolicy::SkipAndContinue,
            concurrency_limit: 4,
            user_agent: format!("ytdlp-resolver/{}", env!("CARGO_PKG_VERSION")),
            timeout: 30,
            retries: 3,
            plugin_dirs: Vec::new(),
        }
    }
}

impl Config {
    /// Load from a TOML file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency_limit == 0 {
            anyhow::bail!("concurrency-limit must be at least 1");
        }
        if self.retries > MAX_RETRIES {
            anyhow::bail!("retries must be at most {}", MAX_RETRIES);
        }
        if self.timeout == 0 {
            anyhow::bail!("timeout must be at least 1 second");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            max-delegation-depth = 3
            playlist-failure-policy = "abort-on-first-failure"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_delegation_depth, 3);
        assert_eq!(
            config.playlist_failure_policy,
            PlaylistFailurePolicy::AbortOnFirstFailure
        );
        assert_eq!(config.concurrency_limit, 4);
        assert_eq!(config.retries, 3);
    }

    #[test]
    fn test_load_from_file_and_validate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency-limit = 0").unwrap();

        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("concurrency-limit"));
    }

    #[test]
    fn test_load_without_path_is_default() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.max_delegation_depth, 10);
        assert_eq!(
            config.playlist_failure_policy,
            PlaylistFailurePolicy::SkipAndContinue
        );
        assert!(config.plugin_dirs.is_empty());
    }

    #[test]
    fn test_retries_are_bounded() {
        let config = Config::from_toml("retries = 100").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retries"));

        assert!(Config::from_toml("retries = 5000000000").is_err());
        assert!(Config::from_toml("retries = 10").unwrap().validate().is_ok());
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(Config::from_toml(r#"playlist-failure-policy = "retry""#).is_err());
    }
}
