//! Wide-to-long reshaping of the per-county time-series sources.
//!
//! Each source has one row per county and one column per calendar date holding
//! a cumulative count. This module turns that into one [`Observation`] per
//! (county, date), attaching the state abbreviation and dropping rows the rest
//! of the pipeline cannot place.

use chrono::NaiveDate;
use csv::StringRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::SchemaError;
use crate::report::RunReport;
use crate::states;
use crate::types::{Location, Observation};

/// Non-date columns of the upstream time-series tables.
pub const IDENTIFIER_COLUMNS: &[&str] = &[
    "UID",
    "iso2",
    "iso3",
    "code3",
    "FIPS",
    "Admin2",
    "Province_State",
    "Country_Region",
    "Lat",
    "Long_",
    "Combined_Key",
    "Population",
];

const DATE_HEADER_FORMATS: &[&str] = &["%m/%d/%y", "%Y-%m-%d"];

/// Which metric a source table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Cases,
    Deaths,
}

impl SourceKind {
    pub fn name(self) -> &'static str {
        match self {
            SourceKind::Cases => "cases",
            SourceKind::Deaths => "deaths",
        }
    }

    /// Only the deaths table carries population.
    pub fn has_population(self) -> bool {
        matches!(self, SourceKind::Deaths)
    }
}

/// Parses a date column header such as `3/15/20`.
pub fn parse_date_header(header: &str) -> Option<NaiveDate> {
    DATE_HEADER_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(header.trim(), fmt).ok())
}

/// Parses a FIPS cell. The upstream tables write them as floats (`1001.0`).
pub fn parse_fips(cell: &str) -> Option<u32> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    if let Ok(v) = cell.parse::<u32>() {
        return (v > 0).then_some(v);
    }
    let v = cell.parse::<f64>().ok()?;
    if v.is_finite() && v > 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 {
        Some(v as u32)
    } else {
        None
    }
}

/// Parses an integral count cell, tolerating a trailing `.0`.
pub fn parse_count(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    if let Ok(v) = cell.parse::<i64>() {
        return Some(v);
    }
    let v = cell.parse::<f64>().ok()?;
    (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
}

struct Columns {
    fips: usize,
    county: usize,
    state: usize,
    population: Option<usize>,
    dates: Vec<(usize, NaiveDate)>,
}

fn resolve_columns(headers: &StringRecord, kind: SourceKind) -> Result<Columns, SchemaError> {
    let find = |column: &'static str| {
        headers
            .iter()
            .position(|h| h.trim() == column)
            .ok_or_else(|| SchemaError::MissingColumn {
                source_name: kind.name().to_string(),
                column,
            })
    };

    let fips = find("FIPS")?;
    let county = find("Admin2")?;
    let state = find("Province_State")?;
    let population = if kind.has_population() {
        Some(find("Population")?)
    } else {
        None
    };

    let mut dates = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if IDENTIFIER_COLUMNS.contains(&header.trim()) {
            continue;
        }
        let date = parse_date_header(header).ok_or_else(|| SchemaError::BadDateHeader {
            source_name: kind.name().to_string(),
            header: header.to_string(),
        })?;
        dates.push((idx, date));
    }

    if dates.is_empty() {
        return Err(SchemaError::NoDateColumns {
            source_name: kind.name().to_string(),
        });
    }

    Ok(Columns {
        fips,
        county,
        state,
        population,
        dates,
    })
}

struct PendingRow {
    location: Arc<Location>,
    population: Option<u64>,
    values: Vec<(NaiveDate, i64)>,
}

/// Reshapes one wide source table into long observations.
///
/// Observations dated before `date_floor`, rows in unrecognized states, rows
/// without a usable FIPS and (deaths only) rows with non-positive population
/// are filtered. Unparsable value cells and FIPS codes listed more than once
/// are data-quality issues: they are logged, counted in `report`, and excluded.
///
/// # Errors
///
/// Returns a [`SchemaError`] if a required column is missing, a non-identifier
/// header is not a date, or the CSV itself is malformed.
pub fn normalize_source(
    bytes: &[u8],
    kind: SourceKind,
    date_floor: NaiveDate,
    report: &mut RunReport,
) -> Result<Vec<Observation>, SchemaError> {
    let csv_err = |source| SchemaError::Csv {
        source_name: kind.name().to_string(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = rdr.headers().map_err(csv_err)?.clone();
    let columns = resolve_columns(&headers, kind)?;

    let in_range: Vec<(usize, NaiveDate)> = columns
        .dates
        .iter()
        .copied()
        .filter(|(_, date)| *date >= date_floor)
        .collect();
    let before_floor = columns.dates.len() - in_range.len();

    debug!(
        source = kind.name(),
        date_columns = columns.dates.len(),
        before_floor,
        "Resolved source columns"
    );

    let mut pending = Vec::new();
    let mut fips_counts: HashMap<u32, usize> = HashMap::new();
    let mut source_rows = 0usize;

    for result in rdr.records() {
        let record = result.map_err(csv_err)?;
        source_rows += 1;
        report.before_date_floor += before_floor;

        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let state = field(columns.state);
        let Some(abbr) = states::abbreviation(state) else {
            report.unknown_state += in_range.len();
            continue;
        };

        let Some(fips) = parse_fips(field(columns.fips)) else {
            report.missing_fips += in_range.len();
            continue;
        };

        let population = match columns.population.map(field) {
            None | Some("") => None,
            Some(cell) => match parse_count(cell) {
                Some(p) if p > 0 => Some(p as u64),
                Some(_) => {
                    report.non_positive_population += in_range.len();
                    continue;
                }
                None => {
                    warn!(source = kind.name(), fips, cell, "Unparsable population");
                    report.invalid_value += in_range.len();
                    continue;
                }
            },
        };

        let mut values = Vec::with_capacity(in_range.len());
        let mut invalid = 0usize;
        for (idx, date) in &in_range {
            match parse_count(field(*idx)) {
                Some(v) => values.push((*date, v)),
                None => invalid += 1,
            }
        }
        if invalid > 0 {
            warn!(source = kind.name(), fips, invalid, "Unparsable value cells");
            report.invalid_value += invalid;
        }

        *fips_counts.entry(fips).or_default() += 1;
        pending.push(PendingRow {
            location: Arc::new(Location {
                fips,
                state: state.to_string(),
                state_abbreviation: abbr.to_string(),
                county: field(columns.county).to_string(),
            }),
            population,
            values,
        });
    }

    let mut observations = Vec::new();
    for row in pending {
        if fips_counts.get(&row.location.fips).copied().unwrap_or(0) > 1 {
            warn!(
                source = kind.name(),
                fips = row.location.fips,
                county = %row.location.county,
                "FIPS listed more than once, excluding every copy"
            );
            report.duplicate_fips += row.values.len();
            continue;
        }
        observations.extend(row.values.into_iter().map(|(date, value)| Observation {
            location: row.location.clone(),
            date,
            value,
            population: row.population,
        }));
    }

    info!(
        source = kind.name(),
        source_rows,
        observations = observations.len(),
        "Source normalized"
    );

    Ok(observations)
}
