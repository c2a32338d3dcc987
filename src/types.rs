//! Row types shared by the pipeline stages.

use chrono::NaiveDate;
use serde::Serialize;
use std::ops::AddAssign;
use std::sync::Arc;

/// Scale used by every normalized column.
pub const PER_CAPITA_SCALE: f64 = 100_000.0;

/// A county as identified by both sources. This is the merge key, minus the date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub fips: u32,
    pub state: String,
    pub state_abbreviation: String,
    pub county: String,
}

/// A metro statistical area (CBSA).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Metro {
    pub id: u32,
    pub name: String,
}

/// Granularity of a unified row.
///
/// Variant order doubles as the output order within a (date, state) block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Geography {
    State,
    County {
        fips: u32,
        county: String,
        metro: Option<Metro>,
    },
    Metro(Metro),
}

impl Geography {
    pub fn fips(&self) -> Option<u32> {
        match self {
            Geography::County { fips, .. } => Some(*fips),
            _ => None,
        }
    }

    pub fn county(&self) -> Option<&str> {
        match self {
            Geography::County { county, .. } => Some(county.as_str()),
            _ => None,
        }
    }

    pub fn metro(&self) -> Option<&Metro> {
        match self {
            Geography::County { metro, .. } => metro.as_ref(),
            Geography::Metro(metro) => Some(metro),
            Geography::State => None,
        }
    }
}

/// Full geography key: what the smoother partitions on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeoKey {
    pub state_abbreviation: String,
    pub state: String,
    pub geography: Geography,
}

/// Raw and delta counts. Deltas can go negative when a source revises downward.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub cases: i64,
    pub new_cases: i64,
    pub deaths: i64,
    pub new_deaths: i64,
}

impl AddAssign for Counts {
    fn add_assign(&mut self, rhs: Self) {
        self.cases += rhs.cases;
        self.new_cases += rhs.new_cases;
        self.deaths += rhs.deaths;
        self.new_deaths += rhs.new_deaths;
    }
}

/// Counts scaled per 100k population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    pub cases: f64,
    pub new_cases: f64,
    pub deaths: f64,
    pub new_deaths: f64,
}

impl Normalized {
    /// Returns `None` unless `population` is known and positive.
    pub fn from_counts(counts: &Counts, population: Option<u64>) -> Option<Self> {
        let population = population.filter(|p| *p > 0)? as f64;
        let scale = |v: i64| v as f64 / population * PER_CAPITA_SCALE;
        Some(Normalized {
            cases: scale(counts.cases),
            new_cases: scale(counts.new_cases),
            deaths: scale(counts.deaths),
            new_deaths: scale(counts.new_deaths),
        })
    }
}

/// One long-form observation out of the source normalizer.
#[derive(Debug, Clone)]
pub struct Observation {
    pub location: Arc<Location>,
    pub date: NaiveDate,
    pub value: i64,
    /// Only ever set by the deaths source; `None` there means a blank cell.
    pub population: Option<u64>,
}

/// Per-county row produced by the metric deriver.
#[derive(Debug, Clone)]
pub struct CountyMetrics {
    pub date: NaiveDate,
    pub location: Arc<Location>,
    pub population: Option<u64>,
    pub counts: Counts,
    pub normalized: Option<Normalized>,
}

/// Canonical row flowing through aggregation and smoothing.
#[derive(Debug, Clone)]
pub struct MetricRow {
    pub date: NaiveDate,
    pub state: String,
    pub state_abbreviation: String,
    pub geography: Geography,
    pub population: Option<u64>,
    pub counts: Counts,
    pub normalized: Option<Normalized>,
}

impl MetricRow {
    pub fn geo_key(&self) -> GeoKey {
        GeoKey {
            state_abbreviation: self.state_abbreviation.clone(),
            state: self.state.clone(),
            geography: self.geography.clone(),
        }
    }

    pub fn value(&self, column: MetricColumn) -> Option<f64> {
        let n = self.normalized.as_ref();
        match column {
            MetricColumn::Cases => Some(self.counts.cases as f64),
            MetricColumn::CasesNorm => n.map(|n| n.cases),
            MetricColumn::NewCases => Some(self.counts.new_cases as f64),
            MetricColumn::NewCasesNorm => n.map(|n| n.new_cases),
            MetricColumn::Deaths => Some(self.counts.deaths as f64),
            MetricColumn::DeathsNorm => n.map(|n| n.deaths),
            MetricColumn::NewDeaths => Some(self.counts.new_deaths as f64),
            MetricColumn::NewDeathsNorm => n.map(|n| n.new_deaths),
        }
    }
}

/// The eight columns that get a `_smooth` twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricColumn {
    Cases,
    CasesNorm,
    NewCases,
    NewCasesNorm,
    Deaths,
    DeathsNorm,
    NewDeaths,
    NewDeathsNorm,
}

impl MetricColumn {
    pub const ALL: [MetricColumn; 8] = [
        MetricColumn::Cases,
        MetricColumn::CasesNorm,
        MetricColumn::NewCases,
        MetricColumn::NewCasesNorm,
        MetricColumn::Deaths,
        MetricColumn::DeathsNorm,
        MetricColumn::NewDeaths,
        MetricColumn::NewDeathsNorm,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Smoothed values for one row, indexed by [`MetricColumn::index`].
pub type SmoothedValues = [Option<f64>; 8];

/// A unified row with its smoothed twin columns.
#[derive(Debug, Clone)]
pub struct SmoothedRow {
    pub row: MetricRow,
    pub smooth: SmoothedValues,
}

impl SmoothedRow {
    pub fn smooth(&self, column: MetricColumn) -> Option<f64> {
        self.smooth[column.index()]
    }
}

/// Flat, nullable shape written to the output CSV.
#[derive(Debug, Serialize)]
pub struct OutputRecord<'a> {
    pub date: NaiveDate,
    pub state: &'a str,
    pub state_abbreviation: &'a str,
    pub dma: Option<u32>,
    pub dma_name: Option<&'a str>,
    pub county: Option<&'a str>,
    pub fips: Option<u32>,
    pub population: Option<u64>,
    pub cases: i64,
    pub new_cases: i64,
    pub deaths: i64,
    pub new_deaths: i64,
    pub cases_norm: Option<f64>,
    pub new_cases_norm: Option<f64>,
    pub deaths_norm: Option<f64>,
    pub new_deaths_norm: Option<f64>,
    pub cases_smooth: Option<f64>,
    pub cases_norm_smooth: Option<f64>,
    pub new_cases_smooth: Option<f64>,
    pub new_cases_norm_smooth: Option<f64>,
    pub deaths_smooth: Option<f64>,
    pub deaths_norm_smooth: Option<f64>,
    pub new_deaths_smooth: Option<f64>,
    pub new_deaths_norm_smooth: Option<f64>,
}

impl<'a> From<&'a SmoothedRow> for OutputRecord<'a> {
    fn from(s: &'a SmoothedRow) -> Self {
        let row = &s.row;
        let metro = row.geography.metro();
        let n = row.normalized.as_ref();
        OutputRecord {
            date: row.date,
            state: &row.state,
            state_abbreviation: &row.state_abbreviation,
            dma: metro.map(|m| m.id),
            dma_name: metro.map(|m| m.name.as_str()),
            county: row.geography.county(),
            fips: row.geography.fips(),
            population: row.population,
            cases: row.counts.cases,
            new_cases: row.counts.new_cases,
            deaths: row.counts.deaths,
            new_deaths: row.counts.new_deaths,
            cases_norm: n.map(|n| n.cases),
            new_cases_norm: n.map(|n| n.new_cases),
            deaths_norm: n.map(|n| n.deaths),
            new_deaths_norm: n.map(|n| n.new_deaths),
            cases_smooth: s.smooth(MetricColumn::Cases),
            cases_norm_smooth: s.smooth(MetricColumn::CasesNorm),
            new_cases_smooth: s.smooth(MetricColumn::NewCases),
            new_cases_norm_smooth: s.smooth(MetricColumn::NewCasesNorm),
            deaths_smooth: s.smooth(MetricColumn::Deaths),
            deaths_norm_smooth: s.smooth(MetricColumn::DeathsNorm),
            new_deaths_smooth: s.smooth(MetricColumn::NewDeaths),
            new_deaths_norm_smooth: s.smooth(MetricColumn::NewDeathsNorm),
        }
    }
}
