use chrono::NaiveDate;
use covid_rollup::config::PipelineConfig;
use covid_rollup::error::SchemaError;
use covid_rollup::output::write_table;
use covid_rollup::pipeline::{Inputs, Output, run};
use covid_rollup::types::{Geography, MetricColumn, SmoothedRow};
use std::collections::BTreeMap;

fn fixture_inputs() -> Inputs {
    Inputs {
        cases: include_bytes!("fixtures/cases.csv").to_vec(),
        deaths: include_bytes!("fixtures/deaths.csv").to_vec(),
        geo_reference: include_bytes!("fixtures/fips_to_city.csv").to_vec(),
    }
}

fn run_fixtures() -> Output {
    run(&fixture_inputs(), &PipelineConfig::default()).expect("fixtures follow the schema")
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 2, d).unwrap()
}

fn find<'a>(
    rows: &'a [SmoothedRow],
    date: NaiveDate,
    abbr: &str,
    pred: impl Fn(&Geography) -> bool,
) -> &'a SmoothedRow {
    rows.iter()
        .find(|r| r.row.date == date && r.row.state_abbreviation == abbr && pred(&r.row.geography))
        .expect("row present")
}

#[test]
fn test_full_pipeline_row_shape() {
    let output = run_fixtures();

    // 3 days x (AL state + 2 counties + 1 metro, GA state + 1 county)
    assert_eq!(output.rows.len(), 18);
    assert_eq!(output.report.output_rows, 18);
    assert!(!output.report.has_data_quality_issues());

    // observations before 2020-02-01 never make it through
    assert!(output.rows.iter().all(|r| r.row.date >= day(1)));

    for r in &output.rows {
        match &r.row.geography {
            Geography::State => {
                assert!(r.row.geography.fips().is_none());
                assert!(r.row.geography.metro().is_none());
            }
            Geography::County { .. } => assert!(r.row.geography.fips().is_some()),
            Geography::Metro(_) => {
                assert!(r.row.geography.fips().is_none());
                assert!(r.row.geography.county().is_none());
            }
        }
    }
}

#[test]
fn test_zero_population_county_excluded() {
    let output = run_fixtures();

    assert!(output.rows.iter().all(|r| r.row.geography.fips() != Some(1003)));
    assert_eq!(output.report.non_positive_population, 3);
    // its cases rows had nothing to merge with
    assert_eq!(output.report.unmatched_merge, 3);
    assert_eq!(output.report.unknown_state, 6);
}

#[test]
fn test_first_row_of_each_group_has_zero_deltas() {
    let output = run_fixtures();

    let mut first: BTreeMap<String, &SmoothedRow> = BTreeMap::new();
    for r in &output.rows {
        let key = format!("{:?}", r.row.geo_key());
        let entry = first.entry(key).or_insert(r);
        if r.row.date < entry.row.date {
            *entry = r;
        }
    }

    assert_eq!(first.len(), 6);
    for r in first.values() {
        assert_eq!(r.row.counts.new_cases, 0);
        assert_eq!(r.row.counts.new_deaths, 0);
    }
}

#[test]
fn test_normalized_columns_follow_population() {
    let output = run_fixtures();

    for r in &output.rows {
        let population = r.row.population.expect("all fixture populations known") as f64;
        let n = r.row.normalized.expect("normalized present");
        assert!((n.new_cases - r.row.counts.new_cases as f64 / population * 100_000.0).abs() < 1e-9);
        assert!((n.cases - r.row.counts.cases as f64 / population * 100_000.0).abs() < 1e-9);
    }
}

#[test]
fn test_state_totals_match_county_sums() {
    let output = run_fixtures();

    for date in [day(1), day(2), day(3)] {
        for abbr in ["AL", "GA"] {
            let county_sum: i64 = output
                .rows
                .iter()
                .filter(|r| {
                    r.row.date == date
                        && r.row.state_abbreviation == abbr
                        && r.row.geography.fips().is_some()
                })
                .map(|r| r.row.counts.cases)
                .sum();
            let state = output
                .rows
                .iter()
                .find(|r| {
                    r.row.date == date
                        && r.row.state_abbreviation == abbr
                        && r.row.geography == Geography::State
                })
                .unwrap();
            assert_eq!(state.row.counts.cases, county_sum);
        }
    }
}

#[test]
fn test_state_scenario_day_two() {
    let output = run_fixtures();
    let al = find(&output.rows, day(2), "AL", |g| *g == Geography::State);

    // (20 - 10) + (5 - 5)
    assert_eq!(al.row.counts.new_cases, 10);
    assert_eq!(al.row.population, Some(150_000));
    let norm = al.row.normalized.unwrap().new_cases;
    assert!((norm - 10.0 / 150_000.0 * 100_000.0).abs() < 1e-9);
    assert!((norm - 6.667).abs() < 1e-3);
}

#[test]
fn test_metro_scenario_day_three() {
    let output = run_fixtures();

    let metro = find(&output.rows, day(3), "AL", |g| matches!(g, Geography::Metro(_)));
    assert_eq!(metro.row.counts.cases, 45);
    assert_eq!(metro.row.geography.metro().map(|m| m.id), Some(77));
    assert_eq!(metro.row.population, Some(150_000));

    let alpha = find(&output.rows, day(3), "AL", |g| g.fips() == Some(1001));
    assert_eq!(alpha.row.counts.cases, 35);
    assert_eq!(alpha.row.geography.metro().map(|m| m.id), Some(77));

    let beta = find(&output.rows, day(3), "AL", |g| g.fips() == Some(1002));
    assert_eq!(beta.row.counts.cases, 10);
    assert_eq!(beta.row.geography.metro().map(|m| m.id), Some(77));

    let delta = find(&output.rows, day(3), "GA", |g| g.fips() == Some(13001));
    assert!(delta.row.geography.metro().is_none());
}

#[test]
fn test_every_row_is_smoothed() {
    let output = run_fixtures();
    for r in &output.rows {
        for column in MetricColumn::ALL {
            assert!(r.smooth(column).is_some(), "{column:?} missing");
        }
    }

    // Georgia cases are 2, 2, 3: smoothing must stay within the observed range
    let mut ga: Vec<&SmoothedRow> = output
        .rows
        .iter()
        .filter(|r| r.row.geography.fips() == Some(13001))
        .collect();
    ga.sort_by_key(|r| r.row.date);
    let smoothed: Vec<f64> = ga
        .iter()
        .map(|r| r.smooth(MetricColumn::Cases).unwrap())
        .collect();
    assert_eq!(smoothed.len(), 3);
    assert!(smoothed.iter().all(|v| (2.0..=3.0).contains(v)));
    assert!(smoothed[0] < smoothed[2]);
}

#[test]
fn test_schema_drift_aborts() {
    let mut inputs = fixture_inputs();
    inputs.cases = b"FIPS,Admin2,Province_State,Comment,2/1/20\n1001,Alpha,Alabama,x,1\n".to_vec();

    let err = match run(&inputs, &PipelineConfig::default()) {
        Err(e) => e,
        Ok(_) => panic!("schema drift must abort"),
    };
    assert!(matches!(err, SchemaError::BadDateHeader { .. }));
}

#[test]
fn test_duplicate_source_rows_reported() {
    let mut inputs = fixture_inputs();
    let mut cases = String::from_utf8(inputs.cases.clone()).unwrap();
    cases.push_str("84001001,US,USA,840,1001.0,Alpha,Alabama,US,32.53,-86.64,\"Alpha, Alabama, US\",1,10,20,35\n");
    inputs.cases = cases.into_bytes();

    let output = run(&inputs, &PipelineConfig::default()).unwrap();
    assert!(output.report.has_data_quality_issues());
    assert_eq!(output.report.duplicate_fips, 6);
    assert!(output.rows.iter().all(|r| r.row.geography.fips() != Some(1001)));

    // Beta alone now makes up the metro
    let metro = find(&output.rows, day(3), "AL", |g| matches!(g, Geography::Metro(_)));
    assert_eq!(metro.row.counts.cases, 10);
}

#[test]
fn test_written_table_columns() {
    let output = run_fixtures();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cases_and_deaths.csv");

    write_table(path.to_str().unwrap(), &output.rows, false).unwrap();

    let mut rdr = csv::Reader::from_path(&path).unwrap();
    let headers: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(headers.len(), 24);
    assert_eq!(&headers[..7], ["date", "state", "state_abbreviation", "dma", "dma_name", "county", "fips"]);
    assert!(headers.iter().any(|h| h == "new_cases_norm_smooth"));

    let records: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 18);
    let (mut state_rows, mut metro_rows, mut metro_county_rows) = (0, 0, 0);
    for record in &records {
        let (dma, dma_name, county, fips) = (&record[3], &record[4], &record[5], &record[6]);
        // county name and FIPS travel together
        assert_eq!(county.is_empty(), fips.is_empty());
        assert_eq!(dma.is_empty(), dma_name.is_empty());
        match (dma.is_empty(), fips.is_empty()) {
            // state row: neither metro nor FIPS
            (true, true) => state_rows += 1,
            // metro row: metro, never a FIPS
            (false, true) => metro_rows += 1,
            // county row inside a retained metro
            (false, false) => metro_county_rows += 1,
            (true, false) => {}
        }
    }
    assert_eq!(state_rows, 6);
    assert_eq!(metro_rows, 3);
    assert_eq!(metro_county_rows, 6);
}
