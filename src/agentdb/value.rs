//! Typed result values for agent-DB query output
//!
//! The executor and comparator only speak this strict value set:
//! numeric / temporal / string / bool / null. Anything a driver returns
//! outside of it is rendered to its string form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// One cell of a result row.
///
/// Serializes to plain JSON scalars; temporals serialize as ISO-8601
/// strings so that artifact round-trips compare equal against live
/// execution (the comparator treats a temporal and its ISO string as the
/// same value). Deserialized temporals therefore come back as `Text`.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(b) => serializer.serialize_bool(*b),
            SqlValue::Int(i) => serializer.serialize_i64(*i),
            SqlValue::Float(f) => serializer.serialize_f64(*f),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Timestamp(_) | SqlValue::Date(_) => {
                serializer.serialize_str(&self.iso_form().unwrap_or_default())
            }
        }
    }
}

impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Null => Ok(SqlValue::Null),
            serde_json::Value::Bool(b) => Ok(SqlValue::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(SqlValue::Int(i))
                } else {
                    Ok(SqlValue::Float(n.as_f64().unwrap_or(0.0)))
                }
            }
            serde_json::Value::String(s) => Ok(SqlValue::Text(s)),
            other => Err(de::Error::custom(format!(
                "unsupported result cell type: {other}"
            ))),
        }
    }
}

impl SqlValue {
    /// ISO form for temporals, `None` for everything else.
    pub fn iso_form(&self) -> Option<String> {
        match self {
            SqlValue::Timestamp(ts) => Some(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            SqlValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Numeric view across Int/Float, `None` otherwise.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(i) => Some(*i as f64),
            SqlValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn from_utc(ts: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(ts.naive_utc())
    }

    /// Stable ordering key used when a result set has to be canonically
    /// sorted before comparison (type rank first, then value).
    pub fn sort_key(&self) -> (u8, String) {
        match self {
            SqlValue::Null => (0, String::new()),
            SqlValue::Bool(b) => (1, b.to_string()),
            SqlValue::Int(_) | SqlValue::Float(_) => {
                // Fixed-width offset encoding keeps lexicographic order
                // consistent with numeric order for the magnitudes we store.
                let v = self.as_f64().unwrap_or(0.0);
                (2, format!("{:030.10}", v + 1e15))
            }
            SqlValue::Text(s) => (3, s.trim().to_string()),
            SqlValue::Timestamp(_) | SqlValue::Date(_) => {
                (4, self.iso_form().unwrap_or_default())
            }
        }
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => SqlValue::Text(s),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporal_serializes_to_iso() {
        let d = SqlValue::Date(NaiveDate::from_ymd_opt(2021, 2, 1).unwrap());
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"2021-02-01\"");
    }

    #[test]
    fn test_scalar_deserialize() {
        let row: Vec<SqlValue> = serde_json::from_str("[null, true, 42, 1.5, \"a\"]").unwrap();
        assert!(matches!(row[0], SqlValue::Null));
        assert!(matches!(row[1], SqlValue::Bool(true)));
        assert!(matches!(row[2], SqlValue::Int(42)));
        assert!(matches!(row[3], SqlValue::Float(f) if (f - 1.5).abs() < 1e-9));
        assert!(matches!(row[4], SqlValue::Text(ref s) if s == "a"));
    }

    #[test]
    fn test_timestamp_round_trips_as_text() {
        let ts = SqlValue::Timestamp(
            NaiveDate::from_ymd_opt(2021, 2, 1)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
        );
        let json = serde_json::to_string(&ts).unwrap();
        let back: SqlValue = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, SqlValue::Text(ref s) if s.starts_with("2021-02-01T08:30:00")));
    }

    #[test]
    fn test_numeric_sort_key_order() {
        let a = SqlValue::Int(-5);
        let b = SqlValue::Float(0.5);
        let c = SqlValue::Int(100);
        assert!(a.sort_key() < b.sort_key());
        assert!(b.sort_key() < c.sort_key());
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(SqlValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(SqlValue::Text("3".into()).as_f64(), None);
    }
}
