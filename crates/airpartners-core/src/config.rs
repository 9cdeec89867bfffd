// crates/airpartners-core/src/config.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub const CACHE_ROOT_ENV: &str = "AIRPARTNERS_CACHE_ROOT";
pub const TOKEN_PATH_ENV: &str = "AIRPARTNERS_TOKEN_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache_root: PathBuf,
    /// IANA name of the zone `timestamp_local` is read in.
    pub local_timezone: String,
    pub meteorology: MeteorologySettings,
    pub quantaq: QuantAqSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteorologySettings {
    pub station: String,
    pub service_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantAqSettings {
    pub base_url: String,
    pub token_path: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("data"),
            local_timezone: "America/New_York".to_string(),
            meteorology: MeteorologySettings::default(),
            quantaq: QuantAqSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for MeteorologySettings {
    fn default() -> Self {
        Self {
            station: "BOS".to_string(),
            service_url: "https://mesonet.agron.iastate.edu/cgi-bin/request/asos.py".to_string(),
            timeout_secs: 300,
        }
    }
}

impl Default for QuantAqSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.quant-aq.com/device-api/v1".to_string(),
            token_path: PathBuf::from("token.txt"),
            timeout_secs: 120,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            delay_secs: 5,
        }
    }
}

impl RetrySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Settings {
    /// Reads settings from an optional TOML file, then applies environment overrides.
    ///
    /// A missing file is only an error when it was asked for explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path).map_err(|err| {
                PipelineError::Config(format!("cannot read {}: {err}", path.display()))
            })?)?,
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| PipelineError::Config(err.to_string()))
    }

    /// Overrides fields from environment variables, looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(CACHE_ROOT_ENV).filter(|v| !v.trim().is_empty()) {
            self.cache_root = PathBuf::from(root);
        }
        if let Some(token) = lookup(TOKEN_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            self.quantaq.token_path = PathBuf::from(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.timezone()?;
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.meteorology.station.trim().is_empty() {
            return Err(PipelineError::Config(
                "meteorology.station must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.local_timezone.parse().map_err(|_| {
            PipelineError::Config(format!("unknown timezone '{}'", self.local_timezone))
        })
    }
}
