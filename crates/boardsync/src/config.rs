use std::env;
use std::path::PathBuf;
use std::time::Duration;

use boardsync_core::SyncTimingConfig;

use crate::cli::WatchArgs;

/// Settings for a `watch` session, from flags and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// REST API base URL (BOARDSYNC_API_URL)
    pub api_url: String,
    /// Real-time WebSocket URL (BOARDSYNC_REALTIME_URL)
    pub realtime_url: String,
    /// Bearer token for API calls (BOARDSYNC_AUTH_TOKEN)
    pub auth_token: Option<String>,
    /// Local user id (BOARDSYNC_USER_ID)
    pub user_id: String,
    /// Board to open (BOARDSYNC_BOARD_ID)
    pub board_id: String,
    /// Optional JSON file with the board's initial content
    pub initial: Option<PathBuf>,
    /// Coalescing timings (BOARDSYNC_*_MS, BOARDSYNC_SWEEP_SECS)
    pub timing: SyncTimingConfig,
    /// Reconnection attempts, 0 for unlimited (BOARDSYNC_RECONNECT_ATTEMPTS, default: 10)
    pub reconnect_attempts: u32,
}

impl Config {
    /// Load `.env`, then resolve every setting, preferring `args` over the environment.
    pub fn from_env(args: WatchArgs) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::resolve(args, |key| env::var(key).ok())
    }

    fn resolve(
        args: WatchArgs,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let required = |flag: Option<String>, key: &'static str| {
            flag.or_else(|| lookup(key))
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let number = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(key)
                .map(|v| v.trim().parse().map_err(|_| ConfigError::InvalidNumber(key)))
                .transpose()
        };

        let api_url = required(args.api_url, "BOARDSYNC_API_URL")?;
        let realtime_url = required(args.realtime_url, "BOARDSYNC_REALTIME_URL")?;
        let user_id = required(args.user, "BOARDSYNC_USER_ID")?;
        let board_id = required(args.board, "BOARDSYNC_BOARD_ID")?;
        let auth_token = args
            .auth_token
            .or_else(|| lookup("BOARDSYNC_AUTH_TOKEN"))
            .filter(|v| !v.is_empty());

        let mut timing = SyncTimingConfig::default();
        if let Some(ms) = args.normal_delay_ms.or(number("BOARDSYNC_NORMAL_DELAY_MS")?) {
            timing = timing.with_normal_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = number("BOARDSYNC_URGENT_DELAY_MS")? {
            timing = timing.with_urgent_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = number("BOARDSYNC_RAPID_WINDOW_MS")? {
            timing = timing.with_rapid_window(Duration::from_millis(ms));
        }
        if let Some(secs) = args.sweep_secs.or(number("BOARDSYNC_SWEEP_SECS")?) {
            if secs == 0 {
                return Err(ConfigError::InvalidNumber("BOARDSYNC_SWEEP_SECS"));
            }
            timing = timing.with_sweep_interval(Duration::from_secs(secs));
        }

        let reconnect_attempts = match args.reconnect_attempts {
            Some(n) => n,
            None => number("BOARDSYNC_RECONNECT_ATTEMPTS")?
                .map(|n| u32::try_from(n).map_err(|_| ConfigError::InvalidNumber("BOARDSYNC_RECONNECT_ATTEMPTS")))
                .transpose()?
                .unwrap_or(10),
        };

        Ok(Self {
            api_url,
            realtime_url,
            auth_token,
            user_id,
            board_id,
            initial: args.initial,
            timing,
            reconnect_attempts,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set (pass the matching flag or set the variable)")]
    Missing(&'static str),
    #[error("{0} must be a positive whole number")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    fn base_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("BOARDSYNC_API_URL", "https://api.example.com/"),
            ("BOARDSYNC_REALTIME_URL", "wss://rt.example.com/ws"),
            ("BOARDSYNC_USER_ID", "alice"),
            ("BOARDSYNC_BOARD_ID", "b-1"),
        ]
    }

    #[test]
    fn test_defaults_from_environment() {
        let config = Config::resolve(WatchArgs::default(), env_of(&base_env())).unwrap();
        assert_eq!(config.board_id, "b-1");
        assert_eq!(config.user_id, "alice");
        assert_eq!(config.auth_token, None);
        assert_eq!(config.timing, SyncTimingConfig::default());
        assert_eq!(config.reconnect_attempts, 10);
    }

    #[test]
    fn test_flags_override_environment() {
        let args = WatchArgs {
            board: Some("b-2".into()),
            normal_delay_ms: Some(60_000),
            ..Default::default()
        };
        let mut env = base_env();
        env.push(("BOARDSYNC_NORMAL_DELAY_MS", "900"));
        env.push(("BOARDSYNC_URGENT_DELAY_MS", "50"));

        let config = Config::resolve(args, env_of(&env)).unwrap();
        assert_eq!(config.board_id, "b-2");
        assert_eq!(config.timing.normal_delay, Duration::from_secs(60));
        assert_eq!(config.timing.urgent_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_missing_board_is_reported() {
        let env: Vec<_> = base_env()
            .into_iter()
            .filter(|(k, _)| *k != "BOARDSYNC_BOARD_ID")
            .collect();
        let err = Config::resolve(WatchArgs::default(), env_of(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BOARDSYNC_BOARD_ID")));
    }

    #[test]
    fn test_bad_numbers_are_rejected() {
        let mut env = base_env();
        env.push(("BOARDSYNC_SWEEP_SECS", "soon"));
        assert!(matches!(
            Config::resolve(WatchArgs::default(), env_of(&env)),
            Err(ConfigError::InvalidNumber("BOARDSYNC_SWEEP_SECS"))
        ));

        let mut env = base_env();
        env.push(("BOARDSYNC_SWEEP_SECS", "0"));
        assert!(Config::resolve(WatchArgs::default(), env_of(&env)).is_err());
    }
}
