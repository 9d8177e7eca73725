//! # CSV Export
//!
//! Writes captured data as comma-separated text and reads it back.
//!
//! Timestamps are written in seconds with six decimals (microsecond
//! resolution). Channel values use the shortest representation that parses
//! back to the same `f64`, so exports are both deterministic and lossless.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::info;

use super::session::CaptureMode;
use crate::error::{CaptureError, Result};
use crate::protocol::snapshot::{SnapshotSample, SNAPSHOT_CHANNELS};
use crate::protocol::stream::{ChannelSchema, LogRecord};

/// Header of a snapshot export
pub const SNAPSHOT_HEADER: &str = "timestamp_s,Ia,Ib,Ic,Va,Vb,Vc,Vbus_approx";

/// First column of a stream export
pub const STREAM_TIMESTAMP_COLUMN: &str = "timestamp";

/// `<dir>/mesc_<mode>_<YYYYmmdd_HHMMSS>.csv`
pub fn default_export_path(dir: &Path, mode: CaptureMode, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("mesc_{}_{}.csv", mode, now.format("%Y%m%d_%H%M%S")))
}

fn format_seconds(timestamp: Duration) -> String {
    format!("{:.6}", timestamp.as_secs_f64())
}

fn parse_seconds(field: &str) -> Option<Duration> {
    let secs: f64 = field.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_micros((secs * 1e6).round() as u64))
}

/// Write snapshot samples as CSV
pub fn write_snapshot_csv<W: Write>(mut out: W, samples: &[SnapshotSample]) -> io::Result<()> {
    writeln!(out, "{}", SNAPSHOT_HEADER)?;
    for sample in samples {
        write!(out, "{}", format_seconds(sample.timestamp))?;
        for value in sample.values() {
            write!(out, ",{}", value)?;
        }
        writeln!(out, ",{}", sample.vbus_approx())?;
    }
    out.flush()
}

/// Write log records as CSV with a `timestamp,<channel…>` header
pub fn write_stream_csv<W: Write>(
    mut out: W,
    schema: &ChannelSchema,
    records: &[LogRecord],
) -> io::Result<()> {
    write!(out, "{}", STREAM_TIMESTAMP_COLUMN)?;
    for name in schema.names() {
        write!(out, ",{}", name)?;
    }
    writeln!(out)?;

    for record in records {
        write!(out, "{}", format_seconds(record.timestamp))?;
        for value in &record.values {
            write!(out, ",{}", value)?;
        }
        writeln!(out)?;
    }
    out.flush()
}

fn create_file(path: &Path) -> io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

/// Export snapshot samples to `path`, creating parent directories
pub fn export_snapshot<P: AsRef<Path>>(path: P, samples: &[SnapshotSample]) -> io::Result<()> {
    let path = path.as_ref();
    write_snapshot_csv(create_file(path)?, samples)?;
    info!("Exported {} snapshot samples to {}", samples.len(), path.display());
    Ok(())
}

/// Export log records to `path`, creating parent directories
pub fn export_stream<P: AsRef<Path>>(
    path: P,
    schema: &ChannelSchema,
    records: &[LogRecord],
) -> io::Result<()> {
    let path = path.as_ref();
    write_stream_csv(create_file(path)?, schema, records)?;
    info!("Exported {} log records to {}", records.len(), path.display());
    Ok(())
}

fn format_error(path: &Path, line: usize, msg: impl std::fmt::Display) -> CaptureError {
    CaptureError::Format(format!("{}:{}: {}", path.display(), line, msg))
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

/// Read a snapshot export back
///
/// # Errors
///
/// Returns `CaptureError::Format` if the header or any row does not match
/// the snapshot export layout.
pub fn read_snapshot_csv<P: AsRef<Path>>(path: P) -> Result<Vec<SnapshotSample>> {
    let path = path.as_ref();
    let mut lines = BufReader::new(File::open(path)?).lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| format_error(path, 1, "empty file"))?;
    let columns = split_fields(&header);
    let expected: Vec<&str> = std::iter::once("timestamp_s").chain(SNAPSHOT_CHANNELS).collect();
    if columns.len() < expected.len() || columns[..expected.len()] != expected[..] {
        return Err(format_error(path, 1, format!("unexpected header '{}'", header)));
    }

    let mut samples = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = i + 2;
        let fields = split_fields(&line);
        if fields.len() != columns.len() {
            return Err(format_error(path, line_no, "wrong column count"));
        }

        let timestamp =
            parse_seconds(fields[0]).ok_or_else(|| format_error(path, line_no, "bad timestamp"))?;
        let mut values = [0.0; 6];
        for (slot, field) in values.iter_mut().zip(&fields[1..7]) {
            *slot = field
                .parse()
                .map_err(|_| format_error(path, line_no, format!("bad value '{}'", field)))?;
        }

        let mut sample = SnapshotSample::from_row(samples.len(), values);
        sample.timestamp = timestamp;
        samples.push(sample);
    }
    Ok(samples)
}

/// Read a stream export back
///
/// # Errors
///
/// Returns `CaptureError::Format` if the header is not `timestamp,...` or a
/// row has the wrong number of numeric fields.
pub fn read_stream_csv<P: AsRef<Path>>(path: P) -> Result<(Arc<ChannelSchema>, Vec<LogRecord>)> {
    let path = path.as_ref();
    let mut lines = BufReader::new(File::open(path)?).lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| format_error(path, 1, "empty file"))?;
    let columns = split_fields(&header);
    if columns.first() != Some(&STREAM_TIMESTAMP_COLUMN) {
        return Err(format_error(path, 1, format!("unexpected header '{}'", header)));
    }
    let schema = Arc::new(ChannelSchema::new(
        columns[1..].iter().map(|c| c.to_string()).collect(),
    ));

    let mut records = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = i + 2;
        let fields = split_fields(&line);
        if fields.len() != columns.len() {
            return Err(format_error(path, line_no, "wrong column count"));
        }

        let timestamp =
            parse_seconds(fields[0]).ok_or_else(|| format_error(path, line_no, "bad timestamp"))?;
        let values = fields[1..]
            .iter()
            .map(|f| {
                f.parse::<f64>()
                    .map_err(|_| format_error(path, line_no, format!("bad value '{}'", f)))
            })
            .collect::<Result<Vec<f64>>>()?;

        records.push(LogRecord {
            timestamp,
            schema: Arc::clone(&schema),
            values,
        });
    }
    Ok((schema, records))
}
