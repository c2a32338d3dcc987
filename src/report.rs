use chrono::{DateTime, Utc};
use serde::Serialize;

/// Row accounting for one batch run.
///
/// Filter counters record rows dropped on purpose. Data-quality counters
/// record rows excluded because the input was inconsistent; any of those
/// makes the run exit non-zero.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,

    // stage sizes
    pub case_observations: usize,
    pub death_observations: usize,
    pub retained_metros: usize,
    pub county_rows: usize,
    pub state_rows: usize,
    pub county_pass_rows: usize,
    pub metro_rows: usize,
    pub output_rows: usize,

    // filters
    pub before_date_floor: usize,
    pub unknown_state: usize,
    pub missing_fips: usize,
    pub non_positive_population: usize,
    pub unmatched_merge: usize,

    // data quality
    pub invalid_value: usize,
    pub duplicate_fips: usize,
    pub unknown_population: usize,
    pub duplicate_geo_key: usize,
    pub duplicate_reference_fips: usize,
}

impl RunReport {
    pub fn new() -> Self {
        RunReport {
            started_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Data-quality counters by reason, in a stable order.
    pub fn data_quality_summary(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("invalid_value", self.invalid_value),
            ("duplicate_fips", self.duplicate_fips),
            ("unknown_population", self.unknown_population),
            ("duplicate_geo_key", self.duplicate_geo_key),
            ("duplicate_reference_fips", self.duplicate_reference_fips),
        ]
    }

    /// Filter counters by reason. Filtered rows never fail a run.
    pub fn filter_summary(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("before_date_floor", self.before_date_floor),
            ("unknown_state", self.unknown_state),
            ("missing_fips", self.missing_fips),
            ("non_positive_population", self.non_positive_population),
            ("unmatched_merge", self.unmatched_merge),
        ]
    }

    pub fn data_quality_issues(&self) -> usize {
        self.data_quality_summary().iter().map(|(_, n)| n).sum()
    }

    pub fn has_data_quality_issues(&self) -> bool {
        self.data_quality_issues() > 0
    }

    /// One-line `reason=count` summary of the non-zero data-quality counters.
    pub fn describe_issues(&self) -> String {
        describe(self.data_quality_summary())
    }

    /// Same shape as [`RunReport::describe_issues`], for the filter counters.
    pub fn describe_filters(&self) -> String {
        describe(self.filter_summary())
    }
}

fn describe(summary: Vec<(&'static str, usize)>) -> String {
    summary
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(reason, n)| format!("{reason}={n}"))
        .collect::<Vec<_>>()
        .join(", ")
}
