use dotenvy::dotenv;
use eyre::Result;
use serde::Deserialize;
use std::{env, str::FromStr, time::Duration};
use tracing::{info, warn};

use crate::models::Window;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub db_path: String,
    pub windows: Vec<Window>,
    pub cycle_interval_secs: u64,
    pub batch_limit: usize,
    pub store_timeout_secs: u64,
    pub refresh_enabled: bool,
}

impl Config {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "corridors.db".to_string(),
            windows: Window::ALL.to_vec(),
            cycle_interval_secs: 75,
            batch_limit: 500,
            store_timeout_secs: 10,
            refresh_enabled: true,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Comma separated windows; unknown entries are skipped, an empty result
/// falls back to every window
pub fn parse_windows(raw: &str) -> Vec<Window> {
    let mut windows: Vec<Window> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<Window>() {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("Skipping window: {}", e);
                None
            }
        })
        .collect();
    windows.dedup();

    if windows.is_empty() {
        Window::ALL.to_vec()
    } else {
        windows
    }
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // Load from .env file

    let defaults = Config::default();

    let db_path = env::var("DATABASE_URL").unwrap_or(defaults.db_path);

    let windows = env::var("WINDOWS")
        .map(|raw| parse_windows(&raw))
        .unwrap_or(defaults.windows);

    let cfg = Config {
        db_path,
        windows,
        cycle_interval_secs: env_or("CYCLE_INTERVAL_SECS", defaults.cycle_interval_secs).max(1),
        batch_limit: env_or("BATCH_LIMIT", defaults.batch_limit).max(1),
        store_timeout_secs: env_or("STORE_TIMEOUT_SECS", defaults.store_timeout_secs).max(1),
        refresh_enabled: env_or("REFRESH_ENABLED", defaults.refresh_enabled),
    };

    info!("Loaded config: {:?}", cfg);

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_windows() {
        assert_eq!(parse_windows("1d, 30d"), vec![Window::Day, Window::Month]);
        assert_eq!(parse_windows("7d,bogus"), vec![Window::Week]);
        assert_eq!(parse_windows(""), Window::ALL.to_vec());
    }

    #[test]
    fn test_defaults_within_design_interval() {
        let cfg = Config::default();
        assert!((60..=90).contains(&cfg.cycle_interval_secs));
        assert_eq!(cfg.batch_limit, 500);
    }
}
