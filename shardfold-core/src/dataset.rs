//! Dataset kinds, their canonical columns, and sort keys.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The market-data datasets we archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DatasetKind {
    /// Korean one-minute intraday quotes.
    #[serde(rename = "kr-1m")]
    Kr1m,
    /// Korean daily OHLCV bars.
    #[serde(rename = "kr-1d")]
    Kr1d,
    /// US five-minute intraday quotes.
    #[serde(rename = "us-5m")]
    Us5m,
}

/// Shape of a dataset's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    /// symbol, timestamp, price, volume
    Quote,
    /// symbol, date, open, high, low, close, volume
    DailyBar,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 3] = [DatasetKind::Kr1m, DatasetKind::Kr1d, DatasetKind::Us5m];

    /// Directory name under the data root, e.g. `KR-1d`.
    pub fn dir_name(&self) -> &'static str {
        match self {
            DatasetKind::Kr1m => "KR-1m",
            DatasetKind::Kr1d => "KR-1d",
            DatasetKind::Us5m => "US-5m",
        }
    }

    pub fn shape(&self) -> RecordShape {
        match self {
            DatasetKind::Kr1m | DatasetKind::Us5m => RecordShape::Quote,
            DatasetKind::Kr1d => RecordShape::DailyBar,
        }
    }

    pub fn sort_key(&self) -> SortKey {
        match self.shape() {
            RecordShape::Quote => SortKey::new(["symbol", "timestamp"]),
            RecordShape::DailyBar => SortKey::new(["symbol", "date"]),
        }
    }

    /// Canonical shard schema, in column order.
    pub fn schema(&self) -> Schema {
        let ts = DataType::Datetime(TimeUnit::Microseconds, None);
        match self {
            DatasetKind::Kr1m => Schema::from_iter(vec![
                Field::new("symbol".into(), DataType::String),
                Field::new("timestamp".into(), ts),
                Field::new("price".into(), DataType::Int64),
                Field::new("volume".into(), DataType::Int64),
            ]),
            DatasetKind::Us5m => Schema::from_iter(vec![
                Field::new("symbol".into(), DataType::String),
                Field::new("timestamp".into(), ts),
                Field::new("price".into(), DataType::Float64),
                Field::new("volume".into(), DataType::Int64),
            ]),
            DatasetKind::Kr1d => Schema::from_iter(vec![
                Field::new("symbol".into(), DataType::String),
                Field::new("date".into(), DataType::Date),
                Field::new("open".into(), DataType::Int64),
                Field::new("high".into(), DataType::Int64),
                Field::new("low".into(), DataType::Int64),
                Field::new("close".into(), DataType::Int64),
                Field::new("volume".into(), DataType::Int64),
            ]),
        }
    }

    /// Every canonical column is present, whatever its dtype.
    pub fn require_columns(&self, df: &DataFrame) -> Result<(), SchemaError> {
        let actual = df.schema();
        match self
            .schema()
            .iter_names()
            .find(|name| !actual.contains(name.as_str()))
        {
            Some(name) => Err(SchemaError::MissingColumn(name.to_string())),
            None => Ok(()),
        }
    }

    /// Validate a frame against this dataset's schema.
    ///
    /// Extra columns are allowed; shards carry whatever upstream wrote.
    pub fn validate(&self, df: &DataFrame) -> Result<(), SchemaError> {
        self.require_columns(df)?;
        let actual = df.schema();

        for field in self.schema().iter_fields() {
            let Some(actual_dtype) = actual.get(field.name()) else {
                continue;
            };
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for DatasetKind {
    type Err = SchemaError;

    /// Accepts either the directory name (`KR-1d`) or the lowercase alias (`kr-1d`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DatasetKind::ALL
            .into_iter()
            .find(|kind| kind.dir_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SchemaError::UnknownDataset(s.to_string()))
    }
}

/// Ordered column tuple defining canonical row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey(Vec<String>);

impl SortKey {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(columns.into_iter().map(Into::into).collect())
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }

    /// Sort key columns absent from `df`, in key order.
    pub fn missing_in(&self, df: &DataFrame) -> Vec<String> {
        let schema = df.schema();
        self.0
            .iter()
            .filter(|c| !schema.contains(c.as_str()))
            .cloned()
            .collect()
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("Unknown dataset '{0}' (expected one of KR-1m, KR-1d, US-5m)")]
    UnknownDataset(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily_frame() -> DataFrame {
        let date = Series::new("date".into(), &[18262i32])
            .cast(&DataType::Date)
            .unwrap();
        DataFrame::new(vec![
            Column::Series(Series::new("symbol".into(), &["005930"]).into()),
            Column::Series(date.into()),
            Column::Series(Series::new("open".into(), &[100i64]).into()),
            Column::Series(Series::new("high".into(), &[110i64]).into()),
            Column::Series(Series::new("low".into(), &[90i64]).into()),
            Column::Series(Series::new("close".into(), &[105i64]).into()),
            Column::Series(Series::new("volume".into(), &[1000i64]).into()),
        ])
        .unwrap()
    }

    #[test]
    fn sort_keys_follow_record_shape() {
        assert_eq!(DatasetKind::Kr1d.sort_key().columns(), ["symbol", "date"]);
        assert_eq!(DatasetKind::Kr1m.sort_key().columns(), ["symbol", "timestamp"]);
        assert_eq!(DatasetKind::Us5m.sort_key().columns(), ["symbol", "timestamp"]);
    }

    #[test]
    fn parses_dir_names_and_aliases() {
        assert_eq!("KR-1d".parse::<DatasetKind>().unwrap(), DatasetKind::Kr1d);
        assert_eq!("us-5m".parse::<DatasetKind>().unwrap(), DatasetKind::Us5m);
        assert!(matches!(
            "KR-5d".parse::<DatasetKind>(),
            Err(SchemaError::UnknownDataset(_))
        ));
    }

    #[test]
    fn validate_accepts_canonical_daily_frame() {
        DatasetKind::Kr1d.validate(&daily_frame()).unwrap();
    }

    #[test]
    fn validate_rejects_missing_column() {
        let df = daily_frame().drop("close").unwrap();
        let err = DatasetKind::Kr1d.validate(&df).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(c) if c == "close"));
    }

    #[test]
    fn validate_rejects_wrong_type() {
        let mut df = daily_frame();
        df.with_column(Series::new("close".into(), &[105.0f64])).unwrap();
        let err = DatasetKind::Kr1d.validate(&df).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));
    }

    #[test]
    fn require_columns_ignores_dtype() {
        let mut df = daily_frame();
        df.with_column(Series::new("close".into(), &[105.0f64])).unwrap();
        DatasetKind::Kr1d.require_columns(&df).unwrap();

        let err = DatasetKind::Kr1d
            .require_columns(&df.drop("volume").unwrap())
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(c) if c == "volume"));
    }

    #[test]
    fn missing_sort_columns_are_reported_in_order() {
        let df = df!("symbol" => &["A"], "price" => &[1i64]).unwrap();
        assert_eq!(DatasetKind::Kr1m.sort_key().missing_in(&df), vec!["timestamp"]);
    }
}
