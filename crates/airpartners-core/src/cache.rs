// crates/airpartners-core/src/cache.rs

use std::fs::{self, File};
use std::io::{Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use ::zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{PipelineError, Result};
use crate::types::{
    validate_sensor_id, CacheKey, CleanedDataset, DateRange, SensorFamily, WindCoverage,
};

const MANIFEST_PATH: &str = "manifest.json";
const READINGS_PATH: &str = "readings.parquet";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    sensor_id: String,
    family: SensorFamily,
    range: DateRange,
    smoothed: bool,
    local_timezone: String,
    wind_coverage: WindCoverage,
    row_count: usize,
    readings_path: String,
    readings_blake3: String,
    written_at: DateTime<Utc>,
}

/// Where a dataset landed after [`CacheStore::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: CacheKey,
    pub path: PathBuf,
    pub readings_blake3: String,
}

/// Cleaned datasets on the local filesystem, one zip archive per [`CacheKey`].
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Archive location for `key`. Sensor ids that would leave the root are rejected.
    pub fn path_for(&self, key: &CacheKey) -> Result<PathBuf> {
        key.validate()?;
        Ok(self.root.join(key.relative_path()))
    }

    /// Creates the directory a key is stored in. Calling it again is a no-op.
    pub fn ensure_location(&self, key: &CacheKey) -> Result<PathBuf> {
        key.validate()?;
        let dir = self.root.join(key.relative_dir());
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).map(|path| path.is_file()).unwrap_or(false)
    }

    /// Serialises the dataset and publishes it under its key.
    ///
    /// The archive is written to a uniquely named file next to its destination and renamed
    /// into place, so a reader sees either the previous entry or the complete new one.
    pub fn write(&self, dataset: &CleanedDataset) -> Result<StoredEntry> {
        let key = dataset.key();
        let dir = self.ensure_location(&key)?;
        let path = self.path_for(&key)?;

        let mut readings = dataset.dataframe.clone();
        let mut readings_bytes = Vec::new();
        ParquetWriter::new(&mut readings_bytes).finish(&mut readings)?;
        let digest = blake3::hash(&readings_bytes).to_hex().to_string();

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            sensor_id: dataset.sensor_id.clone(),
            family: dataset.family,
            range: dataset.range,
            smoothed: dataset.smoothed,
            local_timezone: dataset.local_timezone.name().to_string(),
            wind_coverage: dataset.wind_coverage,
            row_count: dataset.height(),
            readings_path: READINGS_PATH.to_string(),
            readings_blake3: digest.clone(),
            written_at: Utc::now(),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(MANIFEST_PATH, options)?;
        zip.write_all(&manifest_bytes)?;
        zip.start_file(READINGS_PATH, options)?;
        zip.write_all(&readings_bytes)?;
        let archive = zip.finish()?.into_inner();

        let temp_path = dir.join(format!(".{}.{}.tmp", key.file_stem(), Uuid::new_v4()));
        let published = write_temp(&temp_path, &archive).and_then(|_| {
            fs::rename(&temp_path, &path)?;
            Ok(())
        });
        if let Err(err) = published {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %temp_path.display(), error = %cleanup, "failed to remove temp cache file");
                }
            }
            return Err(err);
        }

        info!(
            key = %key,
            path = %path.display(),
            rows = dataset.height(),
            bytes = archive.len(),
            "cached cleaned dataset"
        );

        Ok(StoredEntry {
            key,
            path,
            readings_blake3: digest,
        })
    }

    /// Loads the dataset stored under `key`.
    ///
    /// A key that was never written is [`PipelineError::CacheMiss`]; an archive that cannot be
    /// decoded or fails its digest is [`PipelineError::CorruptCache`].
    pub fn read(&self, key: &CacheKey) -> Result<CleanedDataset> {
        let path = self.path_for(key)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::CacheMiss(key.clone()))
            }
            Err(err) => return Err(err.into()),
        };

        let corrupt = |reason: String| PipelineError::CorruptCache {
            key: key.clone(),
            reason,
        };

        let mut archive = ZipArchive::new(file).map_err(|err| corrupt(err.to_string()))?;
        let manifest: Manifest = {
            let bytes = read_member(&mut archive, MANIFEST_PATH).map_err(corrupt)?;
            serde_json::from_slice(&bytes).map_err(|err| corrupt(err.to_string()))?
        };

        if manifest.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }
        if manifest.sensor_id != key.sensor_id
            || manifest.range != key.range
            || manifest.smoothed != key.smoothed
        {
            return Err(corrupt("manifest describes a different key".to_string()));
        }

        let readings_bytes = read_member(&mut archive, &manifest.readings_path).map_err(corrupt)?;
        let digest = blake3::hash(&readings_bytes).to_hex().to_string();
        if digest != manifest.readings_blake3 {
            return Err(corrupt(format!(
                "readings digest {digest} does not match manifest {}",
                manifest.readings_blake3
            )));
        }

        let dataframe = ParquetReader::new(Cursor::new(readings_bytes))
            .finish()
            .map_err(|err| corrupt(err.to_string()))?;
        if dataframe.height() != manifest.row_count {
            return Err(corrupt(format!(
                "expected {} rows, found {}",
                manifest.row_count,
                dataframe.height()
            )));
        }

        let local_timezone: Tz = manifest
            .local_timezone
            .parse()
            .map_err(|_| corrupt(format!("unknown timezone '{}'", manifest.local_timezone)))?;

        debug!(key = %key, rows = dataframe.height(), "loaded cached dataset");

        Ok(CleanedDataset {
            sensor_id: manifest.sensor_id,
            family: manifest.family,
            range: manifest.range,
            smoothed: manifest.smoothed,
            local_timezone,
            wind_coverage: manifest.wind_coverage,
            dataframe,
        })
    }

    /// Every stored key, optionally restricted to one sensor, ordered by sensor then range.
    pub fn list(&self, sensor_filter: Option<&str>) -> Result<Vec<CacheKey>> {
        if let Some(sensor_id) = sensor_filter {
            validate_sensor_id(sensor_id)?;
        }
        let pattern = self
            .root
            .join("*")
            .join("qaq_cleaned_data")
            .join(sensor_filter.unwrap_or("*"))
            .join("*.zip");
        let pattern = pattern.to_string_lossy();

        let mut keys = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = entry?;
            let (Some(stem), Some(sensor)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.parent()
                    .and_then(|p| p.file_name())
                    .and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            match CacheKey::parse(sensor, stem) {
                Ok(key) => keys.push(key),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unrecognised cache file")
                }
            }
        }

        keys.sort_by(|a, b| {
            (&a.sensor_id, a.range.start, a.range.end, a.smoothed).cmp(&(
                &b.sensor_id,
                b.range.start,
                b.range.end,
                b.smoothed,
            ))
        });
        Ok(keys)
    }
}

fn write_temp(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn read_member(archive: &mut ZipArchive<File>, name: &str) -> std::result::Result<Vec<u8>, String> {
    let mut member = archive
        .by_name(name)
        .map_err(|_| format!("archive is missing {name}"))?;
    let mut bytes = Vec::new();
    member
        .read_to_end(&mut bytes)
        .map_err(|err| format!("failed to read {name}: {err}"))?;
    Ok(bytes)
}
