//! CSV export for market replay results.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::types::StepResult;

/// Column header for CSV telemetry export.
const HEADER: &str = "step,interval_start,asset,oat_c,cleared_price,scheduled_kw,\
                       flex_min_kw,flex_max_kw,bid_min_price,bid_max_price,actuation_active";

/// Exports replay results to a CSV file at the given path.
///
/// Writes a header row followed by one row per market and asset. Produces
/// deterministic output for identical inputs.
///
/// # Arguments
///
/// * `results` - Replay results, in market order
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(results: &[StepResult], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(results, buf)
}

/// Writes replay results as CSV to any writer.
///
/// A missing outdoor temperature is written as an empty field.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(results: &[StepResult], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in results {
        wtr.write_record(&[
            r.step.to_string(),
            r.interval_start.to_rfc3339(),
            r.asset.clone(),
            r.outdoor_temp_c.map(|t| format!("{t:.2}")).unwrap_or_default(),
            format!("{:.5}", r.cleared_price),
            format!("{:.4}", r.scheduled_kw),
            format!("{:.4}", r.flex_min_kw),
            format!("{:.4}", r.flex_max_kw),
            format!("{:.5}", r.bid_min_price),
            format!("{:.5}", r.bid_max_price),
            r.actuation_active.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
