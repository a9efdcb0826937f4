use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Id;

/// A typed property or column value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
    /// Only used as a bind parameter by dialects with native arrays
    StringArray(Vec<String>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::Long(_) => "LONG",
            Self::Double(_) => "DOUBLE",
            Self::String(_) => "STRING",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Binary(_) => "BINARY",
            Self::StringArray(_) => "STRING[]",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            Self::Long(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Null and false are the same thing for flag columns.
    pub fn is_true(&self) -> bool {
        self.as_bool().unwrap_or(false)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Long(i) => Some(*i),
            Self::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(f) => Some(*f),
            Self::Long(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<Id> {
        match self {
            Self::String(s) => Some(Id::Uuid(s.clone())),
            Self::Long(i) => Some(Id::Serial(*i)),
            _ => None,
        }
    }

    /// Text form used for timestamps in databases without a native type.
    pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => {
                if a.is_nan() && b.is_nan() {
                    return true;
                }
                (a - b).abs() < f64::EPSILON
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            (Self::StringArray(a), Self::StringArray(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Boolean(a), Self::Boolean(b)) => a.partial_cmp(b),
            (Self::Long(a), Self::Long(b)) => a.partial_cmp(b),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Long(i), Self::Double(f)) => (*i as f64).partial_cmp(f),
            (Self::Double(f), Self::Long(i)) => f.partial_cmp(&(*i as f64)),
            (Self::String(a), Self::String(b)) => a.partial_cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Self::Long(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Self::Double(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            Self::String(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Self::Timestamp(t) => {
                5u8.hash(state);
                t.hash(state);
            }
            Self::Binary(b) => {
                6u8.hash(state);
                b.hash(state);
            }
            Self::StringArray(a) => {
                7u8.hash(state);
                a.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Long(i) => write!(f, "{}", i),
            Self::Double(d) => write!(f, "{}", d),
            Self::String(s) => write!(f, "'{}'", s),
            Self::Timestamp(t) => write!(f, "TIMESTAMP '{}'", Self::format_timestamp(t)),
            Self::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Self::StringArray(a) => write!(f, "{:?}", a),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Long(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Long(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Double(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<Id> for Value {
    fn from(id: Id) -> Self {
        match id {
            Id::Uuid(s) => Self::String(s),
            Id::Serial(i) => Self::Long(i),
        }
    }
}

impl From<&Id> for Value {
    fn from(id: &Id) -> Self {
        Self::from(id.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}
