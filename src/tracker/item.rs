/// Tracker items
///
/// An item always holds exactly one value per schema column, each already
/// coerced to that column's type.

use crate::error::{AriaError, Result};
use crate::tracker::schema::{Schema, Value};
use std::fmt;
use std::sync::Arc;

/// A record conforming to its tracker's schema
#[derive(Debug, Clone)]
pub struct TrackerItem {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl TrackerItem {
    /// Build an item from positional values, coercing each to its column type
    pub(crate) fn from_values(schema: Arc<Schema>, values: Vec<Value>) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(AriaError::Schema(format!(
                "expected {} values, got {}",
                schema.len(),
                values.len()
            )));
        }

        let mut coerced = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            // Length was checked above, so every index has a type
            let ty = schema.columns()[index].1;
            coerced.push(value.coerce(ty)?);
        }

        Ok(Self {
            schema,
            values: coerced,
        })
    }

    pub(crate) fn zeroed(schema: Arc<Schema>) -> Self {
        let values = schema.columns().iter().map(|(_, ty)| Value::zero(*ty)).collect();
        Self { schema, values }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn schema_arc(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of a named column
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.schema.index_of(column).map(|i| &self.values[i])
    }

    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Overwrite a named column, coercing to its type
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.schema.require(column)?;
        self.set_at(index, value.into())
    }

    pub(crate) fn set_at(&mut self, index: usize, value: Value) -> Result<()> {
        let ty = self
            .schema
            .column_type(index)
            .ok_or_else(|| AriaError::Schema(format!("column index {} out of range", index)))?;
        self.values[index] = value.coerce(ty)?;
        Ok(())
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn get_seq(&self, column: &str) -> Option<&[String]> {
        self.get(column).and_then(Value::as_seq)
    }

    /// True when every field holds its column's zero value (a seed record)
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Value::is_zero)
    }
}

// Identity is structural equality of field values.
impl PartialEq for TrackerItem {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl fmt::Display for TrackerItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .schema
            .names()
            .zip(self.values.iter())
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::schema::ColumnType;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![("name", ColumnType::Str), ("hits", ColumnType::Int)]).unwrap(),
        )
    }

    #[test]
    fn test_from_values_coerces() {
        let item = TrackerItem::from_values(schema(), vec!["alpha".into(), "2".into()]).unwrap();
        assert_eq!(item.get("hits"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_from_values_rejects_wrong_arity() {
        let result = TrackerItem::from_values(schema(), vec!["alpha".into()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_rejects_unknown_column() {
        let mut item = TrackerItem::zeroed(schema());
        assert!(item.set("missing", 1i64).is_err());
        item.set("hits", 7i64).unwrap();
        assert_eq!(item.get_f64("hits"), Some(7.0));
    }

    #[test]
    fn test_equality_is_structural() {
        let a = TrackerItem::from_values(schema(), vec!["alpha".into(), Value::Int(2)]).unwrap();
        let b = TrackerItem::from_values(schema(), vec!["alpha".into(), "2".into()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zeroed_is_empty() {
        assert!(TrackerItem::zeroed(schema()).is_empty());
    }
}
