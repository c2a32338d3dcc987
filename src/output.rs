//! Writing the final table and the run report.
//!
//! The table is written to a temporary file next to its destination and
//! renamed into place, so readers never see a partial file.

use anyhow::{Result, anyhow};
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::report::RunReport;
use crate::types::{OutputRecord, SmoothedRow};

/// Logs the run report as pretty-printed JSON.
pub fn print_report(report: &RunReport) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Serializes `rows` as CSV into `writer`, returning the writer once flushed.
pub fn write_records<W: Write>(writer: W, rows: &[SmoothedRow]) -> Result<W> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);

    for row in rows {
        writer.serialize(OutputRecord::from(row))?;
    }
    writer.flush()?;

    writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV writer: {}", e.error()))
}

/// Final location of the table, with `.gz` appended when compressing.
pub fn destination(path: &str, gzip: bool) -> PathBuf {
    if gzip && !path.ends_with(".gz") {
        PathBuf::from(format!("{path}.gz"))
    } else {
        PathBuf::from(path)
    }
}

/// Writes the table to `path` atomically, optionally gzip-compressed.
///
/// Returns the path actually written.
#[tracing::instrument(skip(rows), fields(rows = rows.len()))]
pub fn write_table(path: &str, rows: &[SmoothedRow], gzip: bool) -> Result<PathBuf> {
    let target = destination(path, gzip);
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let tmp = NamedTempFile::new_in(&dir)?;
    debug!(tmp = %tmp.path().display(), "Writing to temporary file");

    let tmp = if gzip {
        let encoder = write_records(GzEncoder::new(tmp, Compression::default()), rows)?;
        encoder.finish()?
    } else {
        write_records(tmp, rows)?
    };
    tmp.as_file().sync_all()?;
    tmp.persist(&target)?;

    info!(path = %target.display(), gzip, "Output table written");
    Ok(target)
}

/// True when the path names a gzip file.
pub fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}
