use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::smooth::SmoothingConfig;

pub const CASES_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/time_series_covid19_confirmed_US.csv";
pub const DEATHS_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/time_series_covid19_deaths_US.csv";
pub const DEFAULT_GEO_REFERENCE: &str = "data/fips_to_city.csv";
pub const DEFAULT_OUTPUT: &str = "data/cases_and_deaths.csv";
pub const DEFAULT_TOP_K_METROS: usize = 4;

/// Earliest date kept from the sources.
pub fn default_date_floor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 2, 1).expect("valid constant date")
}

/// Settings for one batch run.
///
/// Can be stored as a JSON object on disk; any omitted key takes its default:
/// ```json
/// {
///   "geo_reference": "data/fips_to_city.csv",
///   "top_k_metros": 4,
///   "smoothing": { "method": "local_linear", "window": 13 }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// URL or local path of the cumulative cases table.
    pub cases_source: String,
    /// URL or local path of the cumulative deaths table (with population).
    pub deaths_source: String,
    pub geo_reference: String,
    pub output: String,
    pub date_floor: NaiveDate,
    pub top_k_metros: usize,
    pub smoothing: SmoothingConfig,
    pub gzip: bool,
    pub s3_bucket: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            cases_source: CASES_URL.to_string(),
            deaths_source: DEATHS_URL.to_string(),
            geo_reference: DEFAULT_GEO_REFERENCE.to_string(),
            output: DEFAULT_OUTPUT.to_string(),
            date_floor: default_date_floor(),
            top_k_metros: DEFAULT_TOP_K_METROS,
            smoothing: SmoothingConfig::default(),
            gzip: false,
            s3_bucket: None,
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
