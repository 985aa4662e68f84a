/// Tracker schemas and typed column values
///
/// A schema is an ordered list of named, typed columns. Every value stored
/// in a tracker is coerced into its column's type on the way in.

use crate::error::{AriaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ends each sequence element inside a single field.
///
/// ASCII unit separator: never typed by a person, never part of a path or URL.
/// Every element is terminated, so `[]` encodes as `""` and `[""]` as one
/// separator. Text without a trailing separator is split as plain text.
pub const SEQ_SEPARATOR: char = '\u{1f}';

/// Supported column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Str,
    Seq,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Bool => "bool",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Str => "string",
            ColumnType::Seq => "string-sequence",
        };
        write!(f, "{}", s)
    }
}

/// Ordered `(column name, column type)` list, fixed once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    /// Build a schema from `(name, type)` pairs
    ///
    /// Rejects empty schemas and repeated column names.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let mut built: Vec<(String, ColumnType)> = Vec::new();

        for (name, ty) in columns {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(AriaError::Schema("column names cannot be empty".to_string()));
            }
            if built.iter().any(|(existing, _)| existing == &name) {
                return Err(AriaError::Schema(format!("duplicate column '{}'", name)));
            }
            built.push((name, ty));
        }

        if built.is_empty() {
            return Err(AriaError::Schema("a schema needs at least one column".to_string()));
        }

        Ok(Self { columns: built })
    }

    /// Schema used by trackers that record "when and how often" for a set of targets
    pub fn history() -> Self {
        Self {
            columns: vec![
                ("start_time".to_string(), ColumnType::Float),
                ("end_time".to_string(), ColumnType::Float),
                ("frequency".to_string(), ColumnType::Float),
                ("targets".to_string(), ColumnType::Seq),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|(name, _)| name == column)
    }

    /// Index of a column, or a schema error naming it
    pub fn require(&self, column: &str) -> Result<usize> {
        self.index_of(column)
            .ok_or_else(|| AriaError::Schema(format!("no column named '{}'", column)))
    }

    pub fn column_type(&self, index: usize) -> Option<ColumnType> {
        self.columns.get(index).map(|(_, ty)| *ty)
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<String>),
}

impl Value {
    /// Zero value of a column type, used for seed records
    pub fn zero(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Bool => Value::Bool(false),
            ColumnType::Int => Value::Int(0),
            ColumnType::Float => Value::Float(0.0),
            ColumnType::Str => Value::Str(String::new()),
            ColumnType::Seq => Value::Seq(Vec::new()),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Bool(_) => ColumnType::Bool,
            Value::Int(_) => ColumnType::Int,
            Value::Float(_) => ColumnType::Float,
            Value::Str(_) => ColumnType::Str,
            Value::Seq(_) => ColumnType::Seq,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Value::zero(self.column_type())
    }

    /// Parse raw file text into a column type
    pub fn parse(raw: &str, ty: ColumnType) -> Result<Self> {
        Value::Str(raw.to_string()).coerce(ty)
    }

    /// Convert this value into the given column type
    pub fn coerce(self, ty: ColumnType) -> Result<Self> {
        if self.column_type() == ty {
            return Ok(self);
        }

        let coerced = match (self, ty) {
            (Value::Int(i), ColumnType::Bool) => Value::Bool(i != 0),
            (Value::Float(f), ColumnType::Bool) => Value::Bool(f != 0.0),
            (Value::Str(s), ColumnType::Bool) => Value::Bool(parse_bool(&s)?),

            (Value::Bool(b), ColumnType::Int) => Value::Int(b as i64),
            (Value::Float(f), ColumnType::Int) => Value::Int(f.round() as i64),
            (Value::Str(s), ColumnType::Int) => Value::Int(parse_int(&s)?),

            (Value::Bool(b), ColumnType::Float) => Value::Float(if b { 1.0 } else { 0.0 }),
            (Value::Int(i), ColumnType::Float) => Value::Float(i as f64),
            (Value::Str(s), ColumnType::Float) => Value::Float(parse_float(&s)?),

            (Value::Seq(items), ColumnType::Str) => Value::Str(items.join(" ")),
            (other, ColumnType::Str) => Value::Str(other.to_string()),

            (Value::Str(s), ColumnType::Seq) => Value::Seq(split_seq(&s)),
            (other, ColumnType::Seq) => Value::Seq(vec![other.to_string()]),

            (Value::Seq(items), ty) => {
                return Err(AriaError::Schema(format!(
                    "cannot store sequence {:?} in a {} column",
                    items, ty
                )))
            }
            (value, ty) => {
                return Err(AriaError::Schema(format!(
                    "cannot store {} in a {} column",
                    value, ty
                )))
            }
        };

        Ok(coerced)
    }

    /// Text written to the backing file
    pub fn encode(&self) -> String {
        match self {
            Value::Seq(items) => {
                let mut joined = String::new();
                for item in items {
                    joined.push_str(item);
                    joined.push(SEQ_SEPARATOR);
                }
                joined
            }
            other => other.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(f.round() as i64),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[String]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Seq(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::Seq(items)
    }
}

impl From<Vec<&str>> for Value {
    fn from(items: Vec<&str>) -> Self {
        Value::Seq(items.into_iter().map(str::to_string).collect())
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" | "" => Ok(false),
        other => Err(AriaError::Schema(format!("'{}' is not a boolean", other))),
    }
}

fn parse_int(raw: &str) -> Result<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(i);
    }
    // Older files wrote every number as a float
    trimmed
        .parse::<f64>()
        .map(|f| f.round() as i64)
        .map_err(|_| AriaError::Schema(format!("'{}' is not an integer", trimmed)))
}

fn parse_float(raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| AriaError::Schema(format!("'{}' is not a number", trimmed)))
}

fn split_seq(raw: &str) -> Vec<String> {
    let body = raw.strip_suffix(SEQ_SEPARATOR).unwrap_or(raw);
    if raw.is_empty() {
        Vec::new()
    } else {
        body.split(SEQ_SEPARATOR).map(str::to_string).collect()
    }
}
