//! Raw per-day source files, parsed independently of the shard converter.
//!
//! Format: tab-separated, no header, one file per day named `YYYY-MM-DD.txt`.
//!
//! | kind  | fields                                   |
//! |-------|------------------------------------------|
//! | KR-1m | symbol, price (int), volume (int), HH:MM |
//! | US-5m | symbol, price (float), volume (float), HH:MM |
//! | KR-1d | symbol, open, high, low, close, volume   |
//!
//! US volume arrives fractional; it is rounded to an integer, and a missing
//! value becomes 0. The file stem supplies the date.

use crate::dataset::{DatasetKind, RecordShape};
use crate::window::WindowKey;
use chrono::{NaiveDate, NaiveTime};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RawSourceError {
    #[error("cannot read raw source {}: {source}", path.display())]
    Io { path: PathBuf, source: csv::Error },

    #[error("{}:{line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("raw source {} is not named YYYY-MM-DD", path.display())]
    BadName { path: PathBuf },

    #[error("building frame: {0}")]
    Frame(#[from] PolarsError),
}

#[derive(Default)]
struct Columns {
    symbols: Vec<String>,
    micros: Vec<i64>,
    int_prices: Vec<i64>,
    float_prices: Vec<f64>,
    volumes: Vec<i64>,
    ohlc: [Vec<i64>; 4],
}

/// Parse one raw day file into a canonically typed frame for `kind`.
pub fn read_raw_file(kind: DatasetKind, path: &Path) -> Result<DataFrame, RawSourceError> {
    let date = match WindowKey::from_path(path).parsed() {
        Some(WindowKey::Day(date)) => date,
        _ => {
            return Err(RawSourceError::BadName {
                path: path.to_path_buf(),
            })
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|source| RawSourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let mut cols = Columns::default();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|source| RawSourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(i as u64 + 1, |p| p.line());
        let fields: Vec<&str> = record.iter().map(str::trim).collect();
        push_record(kind, date, &fields, &mut cols).map_err(|reason| RawSourceError::Parse {
            path: path.to_path_buf(),
            line,
            reason,
        })?;
    }

    build_frame(kind, date, cols)
}

fn push_record(
    kind: DatasetKind,
    date: NaiveDate,
    fields: &[&str],
    cols: &mut Columns,
) -> Result<(), String> {
    match kind.shape() {
        RecordShape::Quote => {
            let [symbol, price, volume, time] = fields else {
                return Err(format!("expected 4 fields, got {}", fields.len()));
            };
            let time = parse_time(time)?;
            cols.symbols.push(symbol.to_string());
            cols.micros
                .push(date.and_time(time).and_utc().timestamp_micros());
            if kind == DatasetKind::Us5m {
                cols.float_prices.push(parse_float(price, "price")?);
                cols.volumes.push(round_volume(parse_float(volume, "volume")?));
            } else {
                cols.int_prices.push(parse_int(price, "price")?);
                cols.volumes.push(parse_int(volume, "volume")?);
            }
        }
        RecordShape::DailyBar => {
            let [symbol, open, high, low, close, volume] = fields else {
                return Err(format!("expected 6 fields, got {}", fields.len()));
            };
            cols.symbols.push(symbol.to_string());
            for (slot, (value, name)) in cols.ohlc.iter_mut().zip([
                (open, "open"),
                (high, "high"),
                (low, "low"),
                (close, "close"),
            ]) {
                slot.push(parse_int(value, name)?);
            }
            cols.volumes.push(parse_int(volume, "volume")?);
        }
    }
    Ok(())
}

fn build_frame(kind: DatasetKind, date: NaiveDate, cols: Columns) -> Result<DataFrame, RawSourceError> {
    let symbol = Column::new("symbol".into(), cols.symbols);
    let volume = Column::new("volume".into(), cols.volumes);

    let frame = match kind.shape() {
        RecordShape::Quote => {
            let timestamp = Column::new("timestamp".into(), cols.micros)
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?;
            let price = if kind == DatasetKind::Us5m {
                Column::new("price".into(), cols.float_prices)
            } else {
                Column::new("price".into(), cols.int_prices)
            };
            DataFrame::new(vec![symbol, timestamp, price, volume])?
        }
        RecordShape::DailyBar => {
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
            let day = (date - epoch).num_days() as i32;
            let dates = Column::new("date".into(), vec![day; symbol.len()]).cast(&DataType::Date)?;
            let [open, high, low, close] = cols.ohlc;
            DataFrame::new(vec![
                symbol,
                dates,
                Column::new("open".into(), open),
                Column::new("high".into(), high),
                Column::new("low".into(), low),
                Column::new("close".into(), close),
                volume,
            ])?
        }
    };
    Ok(frame)
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("bad time '{s}'"))
}

fn parse_int(s: &str, field: &str) -> Result<i64, String> {
    s.parse().map_err(|_| format!("bad {field} '{s}'"))
}

/// Empty and `nan` parse as NaN, like a missing cell.
fn parse_float(s: &str, field: &str) -> Result<f64, String> {
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    s.parse().map_err(|_| format!("bad {field} '{s}'"))
}

/// Halves round to even, matching how the shards were converted.
fn round_volume(v: f64) -> i64 {
    if v.is_nan() {
        0
    } else {
        v.round_ties_even() as i64
    }
}

/// Raw `.txt` day files in a year directory, sorted, dotfiles excluded.
pub fn raw_files_in(year_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(year_dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type()?.is_file() && path.extension().is_some_and(|e| e == "txt") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
