//! CLI entry point for the COVID-19 county/state/metro rollup.
//!
//! `run` executes the batch once: load both time-series sources and the geo
//! reference, build the smoothed long table, write it, optionally upload it.
//! `list-metros` shows which metros survive the per-state top-K cut.

use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use covid_rollup::{
    config::PipelineConfig,
    fetch::{BasicClient, load_source},
    geo::load_mapping,
    output::{print_report, write_table},
    pipeline,
    publish::publish,
    report::RunReport,
    smooth::SmoothingMethod,
};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "covid_rollup")]
#[command(about = "Builds state, metro and county COVID-19 tables from county time series", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<String>,

    /// County-to-metro reference CSV
    #[arg(short, long)]
    geo_reference: Option<String>,

    /// Number of metros kept per state
    #[arg(short = 'k', long)]
    top_k: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the batch once
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Cumulative cases table (URL or path)
        #[arg(long)]
        cases: Option<String>,

        /// Cumulative deaths table with population (URL or path)
        #[arg(long)]
        deaths: Option<String>,

        /// Output CSV path
        #[arg(short, long)]
        output: Option<String>,

        /// Drop observations before this date (YYYY-MM-DD)
        #[arg(long)]
        date_floor: Option<NaiveDate>,

        /// Smoothing estimator
        #[arg(long, value_enum)]
        smoothing: Option<SmoothingMethod>,

        /// Gzip the output table
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Optional: S3 bucket to upload the table to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Exit zero even when rows were excluded for data-quality reasons
        #[arg(long, default_value_t = false)]
        allow_data_quality_issues: bool,
    },
    /// List the metros retained per state
    ListMetros {
        #[command(flatten)]
        common: CommonArgs,
    },
}

impl CommonArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load_or_default(self.config.as_deref())?;
        if let Some(path) = &self.geo_reference {
            config.geo_reference = path.clone();
        }
        if let Some(k) = self.top_k {
            config.top_k_metros = k;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/covid_rollup.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("covid_rollup.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            common,
            cases,
            deaths,
            output,
            date_floor,
            smoothing,
            gzip,
            s3_bucket,
            allow_data_quality_issues,
        } => {
            let mut config = common.resolve()?;
            if let Some(cases) = cases {
                config.cases_source = cases;
            }
            if let Some(deaths) = deaths {
                config.deaths_source = deaths;
            }
            if let Some(output) = output {
                config.output = output;
            }
            if let Some(floor) = date_floor {
                config.date_floor = floor;
            }
            if let Some(method) = smoothing {
                config.smoothing.method = method;
            }
            config.gzip |= gzip;
            if s3_bucket.is_some() {
                config.s3_bucket = s3_bucket;
            }

            let report = run_batch(&config).await?;

            let filtered = report.describe_filters();
            if !filtered.is_empty() {
                info!(filtered = %filtered, "Rows filtered");
            }

            if report.has_data_quality_issues() {
                if allow_data_quality_issues {
                    warn!(issues = %report.describe_issues(), "Data-quality issues tolerated");
                } else {
                    error!(issues = %report.describe_issues(), "Rows excluded for data quality");
                    bail!("data-quality issues: {}", report.describe_issues());
                }
            }
        }
        Commands::ListMetros { common } => {
            let config = common.resolve()?;
            let client = BasicClient::new();
            let bytes = load_source(&client, &config.geo_reference).await?;

            let mut report = RunReport::new();
            let mapping = load_mapping(&bytes, config.top_k_metros, &mut report)?;

            for ranked in mapping.retained() {
                info!(
                    state = %ranked.state,
                    metro_id = ranked.metro.id,
                    metro_name = %ranked.metro.name,
                    population = ranked.population,
                    counties = ranked.counties,
                    "Metro"
                );
            }

            info!(
                metros = mapping.retained().len(),
                counties = mapping.len(),
                duplicate_reference_fips = report.duplicate_reference_fips,
                "Metro list summary"
            );
        }
    }

    Ok(())
}

/// Loads inputs, runs the pipeline, writes and optionally publishes the table.
#[tracing::instrument(skip(config), fields(output = %config.output, gzip = config.gzip))]
async fn run_batch(config: &PipelineConfig) -> Result<RunReport> {
    let inputs = pipeline::load_inputs(config).await?;
    let output = pipeline::run(&inputs, config)?;

    let written = write_table(&config.output, &output.rows, config.gzip)?;

    if let Some(bucket) = &config.s3_bucket {
        publish(bucket, &written).await?;
    } else {
        info!("S3 bucket not specified, skipping upload");
    }

    print_report(&output.report)?;
    Ok(output.report)
}
