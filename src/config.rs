//! Wingman configuration.
//!
//! Loaded from `~/.wingman/config.toml`. A missing file means defaults;
//! an unreadable or invalid file is an error — silently running against
//! the wrong journal directory would be worse.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::reply::ReplyPolicy;

/// Wingman configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Directory the game writes journal files into.
    /// Required for `watch`; there is no portable default.
    pub journal_dir: Option<PathBuf>,

    /// Journal file name prefix.
    pub journal_prefix: Option<String>,

    /// Journal file name suffix.
    pub journal_suffix: Option<String>,

    /// Seconds between journal polls.
    pub poll_interval_secs: Option<u64>,

    /// Path of the state store. Defaults to `~/.wingman/state.sqlite`.
    pub store_path: Option<PathBuf>,

    pub reply: ReplyConfig,
}

/// Reply-context budgets. See [`ReplyPolicy`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReplyConfig {
    pub verbatim_games: Option<usize>,
    pub summarized_games: Option<usize>,
    pub history_limit: Option<usize>,
}

impl Config {
    /// Load config from `~/.wingman/config.toml`, or defaults when the
    /// file doesn't exist.
    pub fn load() -> Result<Self, String> {
        let Some(path) = Self::path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        toml::from_str(&contents).map_err(|e| format!("invalid config at {}: {e}", path.display()))
    }

    /// The config file path: `~/.wingman/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".wingman").join("config.toml"))
    }

    pub fn journal_prefix(&self) -> String {
        self.journal_prefix.clone().unwrap_or_else(|| "Journal.".to_string())
    }

    pub fn journal_suffix(&self) -> String {
        self.journal_suffix.clone().unwrap_or_else(|| ".log".to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.unwrap_or(2))
    }

    /// The reply policy with configured overrides applied.
    pub fn reply_policy(&self) -> ReplyPolicy {
        let defaults = ReplyPolicy::default();
        ReplyPolicy {
            verbatim_games: self.reply.verbatim_games.unwrap_or(defaults.verbatim_games),
            summarized_games: self
                .reply
                .summarized_games
                .unwrap_or(defaults.summarized_games),
            history_limit: self.reply.history_limit.unwrap_or(defaults.history_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_absent() {
        let config: Config = toml::from_str("").unwrap();

        assert!(config.journal_dir.is_none());
        assert_eq!(config.journal_prefix(), "Journal.");
        assert_eq!(config.journal_suffix(), ".log");
        assert_eq!(config.poll_interval(), Duration::from_secs(2));

        let policy = config.reply_policy();
        assert_eq!(policy.verbatim_games, 5);
        assert_eq!(policy.summarized_games, 15);
        assert_eq!(policy.history_limit, 100);
    }

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            journal-dir = "/games/journals"
            journal-prefix = "Journal."
            journal-suffix = ".log"
            poll-interval-secs = 1

            [reply]
            verbatim-games = 3
            summarized-games = 9
            history-limit = 50
            "#,
        )
        .unwrap();

        assert_eq!(
            config.journal_dir.as_deref(),
            Some(std::path::Path::new("/games/journals"))
        );
        assert_eq!(config.poll_interval(), Duration::from_secs(1));

        let policy = config.reply_policy();
        assert_eq!(policy.verbatim_games, 3);
        assert_eq!(policy.summarized_games, 9);
        assert_eq!(policy.history_limit, 50);
    }

    #[test]
    fn rejects_invalid_keys() {
        assert!(toml::from_str::<Config>("journal-dir = 42").is_err());
    }
}
