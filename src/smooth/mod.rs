//! Per-geography smoothing of every metric column.
//!
//! Rows are partitioned by their full geography key, ordered by date, and
//! each of the eight metric columns is smoothed independently within its
//! group. Nothing crosses group boundaries and no rows are added or dropped.

pub mod hamming;
pub mod loess;
pub mod utility;

use clap::ValueEnum;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::types::{GeoKey, MetricColumn, MetricRow, SmoothedRow, SmoothedValues};
pub use hamming::HammingAverage;
pub use loess::LocalLinear;

pub const DEFAULT_WINDOW: usize = 13;
pub const DEFAULT_FALLBACK_WINDOW: usize = 7;

/// Turns an ordered series into a smoothed series of the same length.
pub trait Smoother: Send + Sync {
    fn smooth(&self, values: &[f64]) -> Vec<f64>;
}

/// Which estimator to prefer for series long enough to fill the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMethod {
    /// Local linear regression, Hamming average for short series
    #[default]
    LocalLinear,
    /// Hamming-weighted moving average for every series
    Hamming,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub method: SmoothingMethod,
    pub window: usize,
    pub fallback_window: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        SmoothingConfig {
            method: SmoothingMethod::LocalLinear,
            window: DEFAULT_WINDOW,
            fallback_window: DEFAULT_FALLBACK_WINDOW,
        }
    }
}

/// Chooses an estimator per series and handles absent values.
pub struct SeriesSmoother {
    method: SmoothingMethod,
    local: LocalLinear,
    fallback: HammingAverage,
}

impl SeriesSmoother {
    pub fn new(config: &SmoothingConfig) -> Self {
        SeriesSmoother {
            method: config.method,
            local: LocalLinear::new(config.window),
            fallback: HammingAverage::new(config.fallback_window),
        }
    }

    fn estimator(&self, len: usize) -> &dyn Smoother {
        match self.method {
            SmoothingMethod::LocalLinear if len >= self.local.window() => &self.local,
            _ => &self.fallback,
        }
    }

    /// Smooths the present values of `values`, leaving absent positions absent.
    ///
    /// Constant sequences, all-zero ones included, come back unchanged.
    pub fn smooth(&self, values: &[Option<f64>]) -> Vec<Option<f64>> {
        let present: Vec<(usize, f64)> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, v)))
            .collect();
        let series: Vec<f64> = present.iter().map(|(_, v)| *v).collect();

        if utility::is_constant(&series) {
            return values.to_vec();
        }

        let smoothed = self.estimator(series.len()).smooth(&series);
        let mut out = vec![None; values.len()];
        for ((i, _), v) in present.iter().zip(smoothed) {
            out[*i] = Some(v);
        }
        out
    }
}

/// Smooths every metric column of `rows` within each geography group.
///
/// The result is in the same order as `rows` and has the same length.
pub fn smooth_rows(rows: Vec<MetricRow>, smoother: &SeriesSmoother) -> Vec<SmoothedRow> {
    let mut groups: BTreeMap<GeoKey, Vec<usize>> = BTreeMap::new();
    for (idx, row) in rows.iter().enumerate() {
        groups.entry(row.geo_key()).or_default().push(idx);
    }

    let mut smoothed: Vec<SmoothedValues> = vec![[None; 8]; rows.len()];
    let mut short_groups = 0usize;

    for (key, mut members) in groups {
        members.sort_by_key(|&idx| rows[idx].date);
        if members.len() < smoother.local.window() {
            short_groups += 1;
            debug!(
                state = %key.state_abbreviation,
                rows = members.len(),
                "Short series, using fallback estimator"
            );
        }

        for column in MetricColumn::ALL {
            let series: Vec<Option<f64>> =
                members.iter().map(|&idx| rows[idx].value(column)).collect();
            for (&idx, value) in members.iter().zip(smoother.smooth(&series)) {
                smoothed[idx][column.index()] = value;
            }
        }
    }

    info!(rows = rows.len(), short_groups, "Smoothing complete");

    rows.into_iter()
        .zip(smoothed)
        .map(|(row, smooth)| SmoothedRow { row, smooth })
        .collect()
}
