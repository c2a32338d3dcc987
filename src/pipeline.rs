//! End-to-end batch: normalize, derive, aggregate, smooth.

use anyhow::Result;
use tracing::info;

use crate::aggregate::aggregate;
use crate::config::PipelineConfig;
use crate::derive::derive_metrics;
use crate::error::SchemaError;
use crate::fetch::{BasicClient, load_source};
use crate::geo::load_mapping;
use crate::normalize::{SourceKind, normalize_source};
use crate::report::RunReport;
use crate::smooth::{SeriesSmoother, smooth_rows};
use crate::types::SmoothedRow;

/// Raw bytes of the three input tables.
pub struct Inputs {
    pub cases: Vec<u8>,
    pub deaths: Vec<u8>,
    pub geo_reference: Vec<u8>,
}

/// The smoothed table plus the accounting for how it was built.
pub struct Output {
    pub rows: Vec<SmoothedRow>,
    pub report: RunReport,
}

/// Loads all inputs named by `config`; the two sources are fetched concurrently.
#[tracing::instrument(skip(config))]
pub async fn load_inputs(config: &PipelineConfig) -> Result<Inputs> {
    let client = BasicClient::new();
    let (cases, deaths, geo_reference) = tokio::try_join!(
        load_source(&client, &config.cases_source),
        load_source(&client, &config.deaths_source),
        load_source(&client, &config.geo_reference),
    )?;
    Ok(Inputs {
        cases,
        deaths,
        geo_reference,
    })
}

/// Runs the transformation over already-loaded inputs.
///
/// # Errors
///
/// Only schema drift is an error here. Data-quality problems are recorded in
/// the returned report and the offending rows are left out.
pub fn run(inputs: &Inputs, config: &PipelineConfig) -> Result<Output, SchemaError> {
    let mut report = RunReport::new();

    let mapping = load_mapping(&inputs.geo_reference, config.top_k_metros, &mut report)?;
    let cases = normalize_source(
        &inputs.cases,
        SourceKind::Cases,
        config.date_floor,
        &mut report,
    )?;
    let deaths = normalize_source(
        &inputs.deaths,
        SourceKind::Deaths,
        config.date_floor,
        &mut report,
    )?;

    let county_rows = derive_metrics(cases, deaths, &mut report);
    let unified = aggregate(county_rows, &mapping, &mut report);

    let smoother = SeriesSmoother::new(&config.smoothing);
    let rows = smooth_rows(unified, &smoother);
    report.output_rows = rows.len();

    info!(
        output_rows = rows.len(),
        data_quality_issues = report.data_quality_issues(),
        "Pipeline finished"
    );

    Ok(Output { rows, report })
}
