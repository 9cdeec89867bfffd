// crates/airpartners-core/src/fetch.rs

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use airpartners_parser::parse_export;
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{PipelineError, Result};
use crate::pipelines::RawInput;
use crate::types::{DateRange, SensorFamily};

/// Supplies wind observations for an instant range.
///
/// Implementations return the frame shape of [`airpartners_parser::parse_iem_response`]. A
/// range with no observations is an empty frame, not an error.
pub trait MeteorologySource {
    fn fetch(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<DataFrame>;
}

/// Supplies sensor records as the REST API returns them.
pub trait SensorSource {
    fn fetch_records(&self, sensor_id: &str, range: &DateRange, raw: bool) -> Result<Vec<Value>>;
}

/// Fixed-delay retry for remote sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            delay: settings.delay(),
        }
    }
}

impl RetryPolicy {
    /// Calls `op` until it succeeds or the attempts run out, sleeping `delay` between tries.
    ///
    /// `op` receives the 1-based attempt number. Exhaustion is
    /// [`PipelineError::SourceUnavailable`] carrying the last failure.
    pub fn run<T, E, F>(&self, source_name: &'static str, mut op: F) -> Result<T>
    where
        E: Display,
        F: FnMut(u32) -> std::result::Result<T, E>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_failure = String::new();
        for attempt in 1..=attempts {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_failure = err.to_string();
                    warn!(
                        source = source_name,
                        attempt,
                        max_attempts = attempts,
                        error = %last_failure,
                        "fetch attempt failed"
                    );
                    if attempt < attempts && !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }
        Err(PipelineError::SourceUnavailable {
            source_name,
            attempts,
            message: last_failure,
        })
    }
}

/// Reads a sensor's "final" and "raw" exports from disk with the family's column contract.
pub fn load_local_export(
    family: SensorFamily,
    final_path: &Path,
    raw_path: Option<&Path>,
) -> Result<RawInput> {
    let schema = family.schema();

    let final_content = std::fs::read_to_string(final_path)?;
    let final_table = parse_export(&final_content, &schema.final_table)?;
    debug!(
        path = %final_path.display(),
        rows = final_table.height(),
        columns = final_table.width(),
        "parsed final export"
    );

    let raw_table = match (&schema.raw_table, raw_path) {
        (Some(spec), Some(path)) => {
            let content = std::fs::read_to_string(path)?;
            let table = parse_export(&content, spec)?;
            debug!(path = %path.display(), rows = table.height(), "parsed raw export");
            Some(table)
        }
        (Some(_), None) => {
            return Err(PipelineError::Validation(format!(
                "{family} exports need a raw file alongside the final file"
            )))
        }
        (None, Some(path)) => {
            warn!(path = %path.display(), family = %family, "ignoring raw export for family without one");
            None
        }
        (None, None) => None,
    };

    Ok(RawInput::Tables {
        final_table,
        raw_table,
    })
}

#[cfg(feature = "runtime")]
pub use http::{IemClient, QuantAqClient};

#[cfg(feature = "runtime")]
mod http {
    use std::time::Duration;

    use airpartners_parser::parse_iem_response;
    use chrono::{DateTime, Datelike, Utc};
    use polars::prelude::DataFrame;
    use reqwest::blocking::Client;
    use serde::Deserialize;
    use serde_json::Value;
    use tracing::info;

    use super::{MeteorologySource, RetryPolicy, SensorSource};
    use crate::config::{MeteorologySettings, QuantAqSettings};
    use crate::error::{PipelineError, Result};
    use crate::types::DateRange;

    /// ASOS wind observations from the Iowa Environmental Mesonet.
    pub struct IemClient {
        http: Client,
        service_url: String,
        station: String,
        retry: RetryPolicy,
    }

    impl IemClient {
        pub fn new(settings: &MeteorologySettings, retry: RetryPolicy) -> Result<Self> {
            let http = Client::builder()
                .timeout(Duration::from_secs(settings.timeout_secs))
                .build()?;
            Ok(Self {
                http,
                service_url: settings.service_url.clone(),
                station: settings.station.clone(),
                retry,
            })
        }

        /// Query pairs for the service. Its `day2` bound is exclusive, so the request runs
        /// through the day after `end`.
        pub fn query(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(&'static str, String)> {
            let through = end + chrono::Duration::days(1);
            vec![
                ("station", self.station.clone()),
                ("data", "drct".to_string()),
                ("data", "sped".to_string()),
                ("tz", "utc".to_string()),
                ("format", "onlycomma".to_string()),
                ("latlon", "no".to_string()),
                ("elev", "no".to_string()),
                ("missing", "empty".to_string()),
                ("trace", "empty".to_string()),
                ("direct", "no".to_string()),
                ("report_type", "1".to_string()),
                ("report_type", "2".to_string()),
                ("year1", start.year().to_string()),
                ("month1", start.month().to_string()),
                ("day1", start.day().to_string()),
                ("year2", through.year().to_string()),
                ("month2", through.month().to_string()),
                ("day2", through.day().to_string()),
            ]
        }
    }

    impl MeteorologySource for IemClient {
        fn fetch(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<DataFrame> {
            let query = self.query(start, end);
            let body = self.retry.run("meteorology", |_| {
                let text = self
                    .http
                    .get(&self.service_url)
                    .query(&query)
                    .send()
                    .and_then(|response| response.error_for_status())
                    .and_then(|response| response.text())
                    .map_err(|err| err.to_string())?;
                if text.trim_start().starts_with("ERROR") {
                    let first_line = text.lines().next().unwrap_or_default().to_string();
                    return Err(first_line);
                }
                Ok(text)
            })?;

            let df = parse_iem_response(&body)?;
            info!(
                station = %self.station,
                %start,
                %end,
                rows = df.height(),
                "fetched meteorology"
            );
            Ok(df)
        }
    }

    #[derive(Debug, Deserialize)]
    struct Page {
        #[serde(default)]
        data: Vec<Value>,
        #[serde(default)]
        meta: PageMeta,
    }

    #[derive(Debug, Default, Deserialize)]
    struct PageMeta {
        next_url: Option<String>,
    }

    /// QuantAQ device API, authenticated with an API key as the basic-auth user.
    pub struct QuantAqClient {
        http: Client,
        base_url: String,
        api_key: String,
        retry: RetryPolicy,
    }

    impl QuantAqClient {
        /// Builds a client with the API key read from `settings.token_path`.
        pub fn new(settings: &QuantAqSettings, retry: RetryPolicy) -> Result<Self> {
            let api_key = std::fs::read_to_string(&settings.token_path)
                .map_err(|err| {
                    PipelineError::Config(format!(
                        "cannot read API token from {}: {err}",
                        settings.token_path.display()
                    ))
                })?
                .trim()
                .to_string();
            if api_key.is_empty() {
                return Err(PipelineError::Config(format!(
                    "API token file {} is empty",
                    settings.token_path.display()
                )));
            }
            let http = Client::builder()
                .timeout(Duration::from_secs(settings.timeout_secs))
                .build()?;
            Ok(Self {
                http,
                base_url: settings.base_url.trim_end_matches('/').to_string(),
                api_key,
                retry,
            })
        }

        fn get_page(&self, url: &str, query: &[(&str, String)]) -> Result<Page> {
            self.retry.run("sensor api", |_| {
                self.http
                    .get(url)
                    .query(query)
                    .basic_auth(&self.api_key, Some(""))
                    .send()
                    .and_then(|response| response.error_for_status())
                    .and_then(|response| response.json::<Page>())
            })
        }
    }

    impl SensorSource for QuantAqClient {
        fn fetch_records(&self, sensor_id: &str, range: &DateRange, raw: bool) -> Result<Vec<Value>> {
            let suffix = if raw { "data/raw/" } else { "data/" };
            let first_url = format!("{}/devices/{}/{}", self.base_url, sensor_id, suffix);
            let filter = format!(
                "timestamp,ge,{};timestamp,lt,{}",
                range.start.format("%Y-%m-%d"),
                range.end.format("%Y-%m-%d")
            );
            let first_query = vec![("filter", filter), ("per_page", "1000".to_string())];

            let mut records = Vec::new();
            let mut page = self.get_page(&first_url, &first_query)?;
            let mut pages = 1;
            loop {
                records.append(&mut page.data);
                let Some(next) = page.meta.next_url.take().filter(|url| !url.is_empty()) else {
                    break;
                };
                page = self.get_page(&next, &[])?;
                pages += 1;
            }

            info!(
                sensor_id,
                raw,
                pages,
                records = records.len(),
                "fetched sensor records"
            );
            Ok(records)
        }
    }
}
