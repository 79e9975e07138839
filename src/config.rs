use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{IdFormat, Species};
use crate::error::KiraError;
use crate::resolver::{DEFAULT_BATCH_SIZE, ResolverOptions};
use crate::stringdb::{DEFAULT_BASE_URL, StringClientOptions};

pub const DEFAULT_CONFIG_FILE: &str = "kira-ppi.json";
pub const DEFAULT_CALLER_IDENTITY: &str = "kira-ppi";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub species: Option<u32>,
    #[serde(default)]
    pub id_format: Option<IdFormat>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,
    #[serde(default)]
    pub resolve_timeout_secs: Option<u64>,
    #[serde(default)]
    pub network_timeout_secs: Option<u64>,
    #[serde(default)]
    pub string_base_url: Option<String>,
    #[serde(default)]
    pub caller_identity: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// `None` means the per-user default database.
    pub database: Option<Utf8PathBuf>,
    pub species: Species,
    pub id_format: IdFormat,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub resolve_timeout: Duration,
    pub network_timeout: Duration,
    pub string_base_url: String,
    pub caller_identity: String,
}

impl ResolvedConfig {
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            batch_size: self.batch_size,
            batch_delay: self.batch_delay,
        }
    }

    pub fn client_options(&self) -> StringClientOptions {
        StringClientOptions {
            base_url: self.string_base_url.clone(),
            caller_identity: self.caller_identity.clone(),
            resolve_timeout: self.resolve_timeout,
            network_timeout: self.network_timeout,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            database: None,
            species: Species::default(),
            id_format: IdFormat::Symbol,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(100),
            resolve_timeout: Duration::from_secs(15),
            network_timeout: Duration::from_secs(60),
            string_base_url: DEFAULT_BASE_URL.to_string(),
            caller_identity: DEFAULT_CALLER_IDENTITY.to_string(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `kira-ppi.json` from the working directory.
    ///
    /// A missing default file yields the built-in defaults; a missing
    /// explicit path is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let defaults = ResolvedConfig::default();
        let species = match config.species {
            Some(taxon) => taxon.to_string().parse::<Species>()?,
            None => defaults.species,
        };
        let batch_size = config.batch_size.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(KiraError::ConfigParse(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let string_base_url = config
            .string_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.string_base_url);

        Ok(ResolvedConfig {
            database: config.database.map(Utf8PathBuf::from),
            species,
            id_format: config.id_format.unwrap_or(defaults.id_format),
            batch_size,
            batch_delay: config
                .batch_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_delay),
            resolve_timeout: config
                .resolve_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.resolve_timeout),
            network_timeout: config
                .network_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.network_timeout),
            string_base_url,
            caller_identity: config.caller_identity.unwrap_or(defaults.caller_identity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.species, Species::HUMAN);
        assert_eq!(resolved.id_format, IdFormat::Symbol);
        assert_eq!(resolved.batch_size, 200);
        assert_eq!(resolved.batch_delay, Duration::from_millis(100));
        assert_eq!(resolved.resolve_timeout, Duration::from_secs(15));
        assert_eq!(resolved.network_timeout, Duration::from_secs(60));
        assert_eq!(resolved.string_base_url, DEFAULT_BASE_URL);
        assert!(resolved.database.is_none());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = Config {
            batch_size: Some(0),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config).is_err());
    }
}
