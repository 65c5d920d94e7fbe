//! Test helpers for building canonical shard frames and writing them to disk.
//!
//! Shared by unit tests here and the runner's integration tests.

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::fs;
use std::path::Path;

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date must be YYYY-MM-DD")
}

fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .expect("test timestamp must be YYYY-MM-DD HH:MM")
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch");
    (date - epoch).num_days() as i32
}

/// KR-1d frame from `(symbol, date, close)`; open/high/low/volume derive from close.
pub fn daily_bars(rows: &[(&str, &str, i64)]) -> DataFrame {
    let symbols: Vec<&str> = rows.iter().map(|r| r.0).collect();
    let dates: Vec<i32> = rows.iter().map(|r| days_since_epoch(parse_date(r.1))).collect();
    let closes: Vec<i64> = rows.iter().map(|r| r.2).collect();

    DataFrame::new(vec![
        Column::new("symbol".into(), symbols),
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .expect("date cast"),
        Column::new("open".into(), closes.iter().map(|c| c - 1).collect::<Vec<_>>()),
        Column::new("high".into(), closes.iter().map(|c| c + 2).collect::<Vec<_>>()),
        Column::new("low".into(), closes.iter().map(|c| c - 2).collect::<Vec<_>>()),
        Column::new("close".into(), closes.clone()),
        Column::new("volume".into(), closes.iter().map(|c| c * 100).collect::<Vec<_>>()),
    ])
    .expect("daily frame")
}

/// KR-1m frame from `(symbol, "YYYY-MM-DD HH:MM", price, volume)`.
pub fn quotes(rows: &[(&str, &str, i64, i64)]) -> DataFrame {
    let symbols: Vec<&str> = rows.iter().map(|r| r.0).collect();
    let micros: Vec<i64> = rows
        .iter()
        .map(|r| parse_ts(r.1).and_utc().timestamp_micros())
        .collect();
    let prices: Vec<i64> = rows.iter().map(|r| r.2).collect();
    let volumes: Vec<i64> = rows.iter().map(|r| r.3).collect();

    DataFrame::new(vec![
        Column::new("symbol".into(), symbols),
        Column::new("timestamp".into(), micros)
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
            .expect("timestamp cast"),
        Column::new("price".into(), prices),
        Column::new("volume".into(), volumes),
    ])
    .expect("quote frame")
}

/// US-5m frame from `(symbol, "YYYY-MM-DD HH:MM", price, volume)`.
pub fn us_quotes(rows: &[(&str, &str, f64, i64)]) -> DataFrame {
    let symbols: Vec<&str> = rows.iter().map(|r| r.0).collect();
    let micros: Vec<i64> = rows
        .iter()
        .map(|r| parse_ts(r.1).and_utc().timestamp_micros())
        .collect();
    let prices: Vec<f64> = rows.iter().map(|r| r.2).collect();
    let volumes: Vec<i64> = rows.iter().map(|r| r.3).collect();

    DataFrame::new(vec![
        Column::new("symbol".into(), symbols),
        Column::new("timestamp".into(), micros)
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
            .expect("timestamp cast"),
        Column::new("price".into(), prices),
        Column::new("volume".into(), volumes),
    ])
    .expect("us quote frame")
}

/// Write `frame` as Parquet at `path`, creating parent directories.
pub fn write_shard(path: &Path, frame: &DataFrame) {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).expect("create shard dir");
    }
    let mut file = fs::File::create(path).expect("create shard");
    let mut frame = frame.clone();
    ParquetWriter::new(&mut file)
        .finish(&mut frame)
        .expect("write shard");
}

/// Read a Parquet file written by [`write_shard`] or the consolidator.
pub fn read_parquet(path: &Path) -> DataFrame {
    let file = fs::File::open(path).expect("open parquet");
    ParquetReader::new(file).finish().expect("read parquet")
}

/// Write raw tab-separated source lines, one per row.
pub fn write_raw(path: &Path, lines: &[&str]) {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).expect("create raw dir");
    }
    let mut body = lines.join("\n");
    body.push('\n');
    fs::write(path, body).expect("write raw source");
}
