use std::path::PathBuf;
use std::time::Duration;

use swapdesk_types::Language;
use thiserror::Error;

const DEFAULT_DB_PATH: &str = "swapdesk.db";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_ASSETS: &str = "USD,EUR,RUB,USDT,BTC,ETH";
const DEFAULT_SESSION_CAPACITY: usize = 10_000;
const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive number, got {value:?}")]
    NotANumber { key: &'static str, value: String },
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub sweep_interval: Duration,
    /// Static currency catalog, reseeded on every start.
    pub assets: Vec<String>,
    pub session_capacity: usize,
    pub session_ttl: Duration,
    pub default_language: Language,
    /// Handles the console transport reports as master chat administrators.
    pub console_admins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let number = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                None => Ok(default),
                Some(value) => match value.trim().parse::<u64>() {
                    Ok(n) if n > 0 => Ok(n),
                    _ => Err(ConfigError::NotANumber { key, value }),
                },
            }
        };

        let db_path = lookup("SWAPDESK_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into());
        let sweep_interval = Duration::from_secs(number("SWAPDESK_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?);
        let session_capacity = number("SWAPDESK_SESSION_CAPACITY", DEFAULT_SESSION_CAPACITY as u64)? as usize;
        let session_ttl = Duration::from_secs(number("SWAPDESK_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?);

        let assets = split_list(&lookup("SWAPDESK_ASSETS").unwrap_or_else(|| DEFAULT_ASSETS.into()))
            .into_iter()
            .map(|a| a.to_ascii_uppercase())
            .collect::<Vec<_>>();
        if assets.is_empty() {
            return Err(ConfigError::Invalid {
                key: "SWAPDESK_ASSETS",
                reason: "at least one currency is required".into(),
            });
        }

        let default_language = match lookup("SWAPDESK_DEFAULT_LANGUAGE") {
            Some(tag) => tag.parse().map_err(|reason| ConfigError::Invalid {
                key: "SWAPDESK_DEFAULT_LANGUAGE",
                reason,
            })?,
            None => Language::default(),
        };

        let console_admins = split_list(&lookup("SWAPDESK_CONSOLE_ADMINS").unwrap_or_default())
            .into_iter()
            .map(|h| h.trim_start_matches('@').to_string())
            .collect();

        Ok(Self {
            db_path: PathBuf::from(db_path),
            sweep_interval,
            assets,
            session_capacity,
            session_ttl,
            default_language,
            console_admins,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = config(&[]).unwrap();
        assert_eq!(c.db_path, PathBuf::from("swapdesk.db"));
        assert_eq!(c.sweep_interval, Duration::from_secs(86_400));
        assert_eq!(c.assets.len(), 6);
        assert_eq!(c.session_capacity, 10_000);
        assert_eq!(c.default_language, Language::Ru);
        assert!(c.console_admins.is_empty());
    }

    #[test]
    fn lists_are_trimmed_and_normalized() {
        let c = config(&[
            ("SWAPDESK_ASSETS", " usd, eur ,,btc"),
            ("SWAPDESK_CONSOLE_ADMINS", "@root, ops"),
            ("SWAPDESK_DEFAULT_LANGUAGE", "EN"),
        ])
        .unwrap();
        assert_eq!(c.assets, vec!["USD", "EUR", "BTC"]);
        assert_eq!(c.console_admins, vec!["root", "ops"]);
        assert_eq!(c.default_language, Language::En);
    }

    #[test]
    fn bad_values_are_errors() {
        assert_eq!(
            config(&[("SWAPDESK_SWEEP_INTERVAL_SECS", "daily")]),
            Err(ConfigError::NotANumber {
                key: "SWAPDESK_SWEEP_INTERVAL_SECS",
                value: "daily".into()
            })
        );
        assert!(config(&[("SWAPDESK_SESSION_CAPACITY", "0")]).is_err());
        assert!(config(&[("SWAPDESK_ASSETS", " , ")]).is_err());
        assert!(config(&[("SWAPDESK_DEFAULT_LANGUAGE", "de")]).is_err());
    }
}
