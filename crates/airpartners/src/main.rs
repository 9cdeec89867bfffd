use std::path::PathBuf;

use airpartners_core::diagnostics::{summarize_columns, ColumnDiagnostics};
use airpartners_core::fetch::{load_local_export, RetryPolicy, SensorSource};
use airpartners_core::pipelines::all_pipeline_descriptors;
use airpartners_core::{
    CacheKey, CacheStore, CleaningOutcome, CleaningPipeline, CleaningRequest, DateRange, IemClient,
    QuantAqClient, RawInput, SensorFamily, Settings,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Air Partners sensor cleaning CLI", long_about = None)]
struct Cli {
    /// Optional TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean a sensor's exported final/raw CSV files
    CleanLocal(CleanLocalArgs),
    /// Download and clean a sensor's readings from the device API
    CleanApi(CleanApiArgs),
    /// Summarise a cached cleaned dataset
    Show(KeyArgs),
    /// List cached cleaned datasets
    CacheList(CacheListArgs),
    /// List the registered cleaning pipelines
    Pipelines,
}

#[derive(Args, Debug)]
struct CleanLocalArgs {
    /// Sensor serial number, e.g. SN000-072 or MOD-PM-00117
    #[arg(long)]
    sensor: String,
    /// Path to the "final" export
    #[arg(long = "final")]
    final_path: PathBuf,
    /// Path to the "raw" export
    #[arg(long = "raw")]
    raw_path: Option<PathBuf>,
    /// Override the family inferred from the serial number
    #[arg(long, value_parser = parse_family)]
    family: Option<SensorFamily>,
    /// Keep extreme readings instead of zeroing them
    #[arg(long)]
    unsmoothed: bool,
    /// Clean again even when a cached dataset exists
    #[arg(long)]
    refresh: bool,
}

#[derive(Args, Debug)]
struct CleanApiArgs {
    #[command(flatten)]
    key: KeyArgs,
    #[arg(long, value_parser = parse_family)]
    family: Option<SensorFamily>,
    #[arg(long)]
    refresh: bool,
}

#[derive(Args, Debug)]
struct KeyArgs {
    #[arg(long)]
    sensor: String,
    /// First day, YYYY-MM-DD
    #[arg(long)]
    start: NaiveDate,
    /// Last day, YYYY-MM-DD
    #[arg(long)]
    end: NaiveDate,
    #[arg(long)]
    unsmoothed: bool,
}

#[derive(Args, Debug, Default)]
struct CacheListArgs {
    /// Only list entries for this sensor
    #[arg(long)]
    sensor: Option<String>,
}

impl KeyArgs {
    fn range(&self) -> Result<DateRange> {
        DateRange::new(self.start, self.end).context("invalid date range")
    }
}

fn parse_family(value: &str) -> std::result::Result<SensorFamily, String> {
    value.parse().map_err(|err| format!("{err}"))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    let cache = CacheStore::new(&settings.cache_root);

    match cli.command {
        Command::CleanLocal(args) => clean_local(&settings, &cache, args),
        Command::CleanApi(args) => clean_api(&settings, &cache, args),
        Command::Show(args) => show(&cache, &args),
        Command::CacheList(args) => cache_list(&cache, &args),
        Command::Pipelines => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["code", "version", "family", "description"]);
            for descriptor in all_pipeline_descriptors() {
                table.add_row(vec![
                    descriptor.code.to_string(),
                    descriptor.version.to_string(),
                    descriptor.family.to_string(),
                    descriptor.description.to_string(),
                ]);
            }
            println!("{table}");
            Ok(())
        }
    }
}

fn clean_local(settings: &Settings, cache: &CacheStore, args: CleanLocalArgs) -> Result<()> {
    let family = match args.family {
        Some(family) => family,
        None => SensorFamily::infer(&args.sensor, false)?,
    };
    let meteorology = IemClient::new(&settings.meteorology, settings.retry.into())
        .context("failed to build meteorology client")?;
    let pipeline = CleaningPipeline::new(&meteorology, cache, settings.timezone()?);
    let request = CleaningRequest {
        sensor_id: args.sensor.clone(),
        family,
        range: None,
        smoothed: !args.unsmoothed,
    };

    let load = || load_local_export(family, &args.final_path, args.raw_path.as_deref());
    let outcome = if args.refresh {
        pipeline.run(&request, load()?)
    } else {
        pipeline.load_or_run(&request, load)
    }
    .with_context(|| format!("cleaning {} failed", args.sensor))?;

    report_outcome(&outcome);
    Ok(())
}

fn clean_api(settings: &Settings, cache: &CacheStore, args: CleanApiArgs) -> Result<()> {
    let range = args.key.range()?;
    let family = match args.family {
        Some(family) => family,
        None => SensorFamily::infer(&args.key.sensor, true)?,
    };
    let retry: RetryPolicy = settings.retry.into();
    let meteorology = IemClient::new(&settings.meteorology, retry)
        .context("failed to build meteorology client")?;
    let sensors = QuantAqClient::new(&settings.quantaq, retry)
        .context("failed to build sensor API client")?;
    let pipeline = CleaningPipeline::new(&meteorology, cache, settings.timezone()?);
    let request = CleaningRequest {
        sensor_id: args.key.sensor.clone(),
        family,
        range: Some(range),
        smoothed: !args.key.unsmoothed,
    };

    let needs_raw = family.schema().raw_table.is_some();
    let load = || -> airpartners_core::Result<RawInput> {
        let final_records = sensors.fetch_records(&request.sensor_id, &range, false)?;
        let raw_records = if needs_raw {
            Some(sensors.fetch_records(&request.sensor_id, &range, true)?)
        } else {
            None
        };
        Ok(RawInput::Records {
            final_records,
            raw_records,
        })
    };
    let outcome = if args.refresh {
        pipeline.run(&request, load()?)
    } else {
        pipeline.load_or_run(&request, load)
    }
    .with_context(|| format!("cleaning {} over {range} failed", args.key.sensor))?;

    report_outcome(&outcome);
    Ok(())
}

fn report_outcome(outcome: &CleaningOutcome) {
    let dataset = &outcome.dataset;
    let key = dataset.key();
    match &outcome.report {
        None => info!(key = %key, rows = dataset.height(), "served from cache"),
        Some(report) => {
            info!(
                key = %key,
                pipeline = report.pipeline.code,
                merged_rows = report.merged_rows,
                duplicates = report.dedup.removed(),
                clamped = report.cutoffs.total_changed(),
                spikes = report.spikes.total_flagged(),
                path = %report.stored.path.display(),
                "cleaned dataset stored"
            );
            if !dataset.is_wind_complete() {
                warn!(key = %key, coverage = ?dataset.wind_coverage, "wind coverage incomplete");
            }
        }
    }
    println!(
        "{} {} rows={} wind={:?}",
        key,
        if outcome.from_cache() { "(cached)" } else { "(cleaned)" },
        dataset.height(),
        dataset.wind_coverage
    );
}

fn show(cache: &CacheStore, args: &KeyArgs) -> Result<()> {
    let key = CacheKey::new(args.sensor.clone(), args.range()?, !args.unsmoothed);
    let dataset = cache
        .read(&key)
        .with_context(|| format!("cannot read cached dataset {key}"))?;

    println!(
        "{} family={} tz={} rows={} wind={:?}",
        key,
        dataset.family,
        dataset.local_timezone.name(),
        dataset.height(),
        dataset.wind_coverage
    );

    let summaries = summarize_columns(&dataset.dataframe, dataset.family.schema().data_columns)
        .context("failed to summarise columns")?;
    println!("{}", diagnostics_table(&summaries));
    Ok(())
}

fn diagnostics_table(summaries: &[ColumnDiagnostics]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "column", "rows", "zeros", "negatives", "missing", "mean", "q25", "q75",
    ]);
    for summary in summaries {
        table.add_row(vec![
            summary.column.clone(),
            summary.rows.to_string(),
            summary.zeros.to_string(),
            summary.negatives.to_string(),
            summary.missing.to_string(),
            format_value(summary.mean),
            format_value(summary.q25),
            format_value(summary.q75),
        ]);
    }
    table
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.3}")).unwrap_or_else(|| "-".to_string())
}

fn cache_list(cache: &CacheStore, args: &CacheListArgs) -> Result<()> {
    let keys = cache
        .list(args.sensor.as_deref())
        .with_context(|| format!("cannot list cache under {}", cache.root().display()))?;
    if keys.is_empty() {
        println!("no cached datasets under {}", cache.root().display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["sensor", "range", "smoothed", "path"]);
    for key in &keys {
        let path = cache.path_for(key)?;
        table.add_row(vec![
            key.sensor_id.clone(),
            key.range.to_string(),
            key.smoothed.to_string(),
            path.display().to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
