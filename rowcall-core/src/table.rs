//! Tabular data model: tables, units and batches

use crate::error::TableError;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// TABLE
// ============================================================================

/// Ordered columns plus rows of JSON values aligned with them.
///
/// Column order is insertion order and is preserved through every
/// transformation. Rows are never reordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given schema.
    pub fn new<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut seen = HashSet::with_capacity(columns.len());
        for (index, name) in columns.iter().enumerate() {
            if name.is_empty() {
                return Err(TableError::EmptyColumnName { index });
            }
            if !seen.insert(name.as_str()) {
                return Err(TableError::DuplicateColumn { name: name.clone() });
            }
        }
        Ok(Self {
            columns: columns.into(),
            rows: Vec::new(),
        })
    }

    /// Append a row. Its length must match the schema.
    pub fn push_row(&mut self, values: Vec<Value>) -> Result<(), TableError> {
        if values.len() != self.columns.len() {
            return Err(TableError::ArityMismatch {
                row: self.rows.len(),
                expected: self.columns.len(),
                got: values.len(),
            });
        }
        self.rows.push(values);
        Ok(())
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[Value]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>, TableError> {
        let index = self
            .column_index(name)
            .ok_or_else(|| TableError::ColumnNotFound {
                name: name.to_string(),
            })?;
        Ok(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Split the table into independent units, one per row.
    ///
    /// Units share the column list, so this costs one clone per row of values.
    pub fn units(&self) -> Vec<Unit> {
        self.rows
            .iter()
            .enumerate()
            .map(|(position, values)| Unit {
                position,
                columns: Arc::clone(&self.columns),
                values: values.clone(),
            })
            .collect()
    }

    /// Build a table from JSON objects.
    ///
    /// The schema is the union of keys in first-seen order; a record missing a
    /// key gets `null` in that column.
    pub fn from_records(records: Vec<Map<String, Value>>) -> Result<Self, TableError> {
        let mut columns: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for record in &records {
            for key in record.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }

        let mut table = Table::new(columns)?;
        for mut record in records {
            let row = table
                .columns
                .iter()
                .map(|c| record.remove(c).unwrap_or(Value::Null))
                .collect();
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Build a table from arbitrary JSON values, each of which must be an object.
    pub fn from_json_values(values: Vec<Value>) -> Result<Self, TableError> {
        let records = values
            .into_iter()
            .enumerate()
            .map(|(row, value)| match value {
                Value::Object(map) => Ok(map),
                _ => Err(TableError::NotAnObject { row }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_records(records)
    }

    /// Convert every row back into a JSON object, keys in schema order.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Return a new table with the given columns appended to the right.
    ///
    /// `columns` holds one full column of values per new name.
    pub fn with_appended_columns(
        &self,
        names: &[String],
        columns: Vec<Vec<Value>>,
    ) -> Result<Table, TableError> {
        let mut out = Table::new(self.columns.iter().chain(names.iter()).cloned())?;
        if let Some(short) = columns.iter().find(|c| c.len() != self.rows.len()) {
            return Err(TableError::ArityMismatch {
                row: short.len().min(self.rows.len()),
                expected: self.rows.len(),
                got: short.len(),
            });
        }
        if columns.len() != names.len() {
            return Err(TableError::ArityMismatch {
                row: 0,
                expected: names.len(),
                got: columns.len(),
            });
        }
        for (i, row) in self.rows.iter().enumerate() {
            let mut values = row.clone();
            values.extend(columns.iter().map(|col| col[i].clone()));
            out.push_row(values)?;
        }
        Ok(out)
    }
}

// ============================================================================
// UNIT
// ============================================================================

/// One input record, identified by its original row position.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    position: usize,
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Unit {
    /// Original row position in the input table.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Column name and value pairs, in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The record as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }
}

// ============================================================================
// BATCH
// ============================================================================

/// Bounded, ordered group of units submitted in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    index: usize,
    units: Vec<Unit>,
}

impl Batch {
    pub fn new(index: usize, units: Vec<Unit>) -> Self {
        Self { index, units }
    }

    /// Sequence number of this batch within the run.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Original row position of the unit at `position` within this batch.
    pub fn origin_of(&self, position: usize) -> Option<usize> {
        self.units.get(position).map(Unit::position)
    }

    /// Every unit as a JSON object, in batch order.
    pub fn to_json(&self) -> Value {
        Value::Array(self.units.iter().map(Unit::to_json).collect())
    }
}

/// Split units into consecutive batches of at most `size` units.
///
/// A `size` of zero is treated as one.
pub fn chunk_units(units: Vec<Unit>, size: usize) -> Vec<Batch> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(units.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for unit in units {
        current.push(unit);
        if current.len() == size {
            let full = std::mem::replace(&mut current, Vec::with_capacity(size));
            batches.push(Batch::new(batches.len(), full));
        }
    }
    if !current.is_empty() {
        batches.push(Batch::new(batches.len(), current));
    }
    batches
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Table {
        let mut table = Table::new(["id", "text"]).unwrap();
        table.push_row(vec![json!(1), json!("hello")]).unwrap();
        table.push_row(vec![json!(2), json!("world")]).unwrap();
        table.push_row(vec![json!(3), json!("")]).unwrap();
        table
    }

    #[test]
    fn test_new_rejects_duplicate_columns() {
        let err = Table::new(["a", "b", "a"]).unwrap_err();
        assert_eq!(
            err,
            TableError::DuplicateColumn {
                name: "a".to_string()
            }
        );
    }

    #[test]
    fn test_new_rejects_empty_column_name() {
        let err = Table::new(["a", ""]).unwrap_err();
        assert_eq!(err, TableError::EmptyColumnName { index: 1 });
    }

    #[test]
    fn test_push_row_rejects_arity_mismatch() {
        let mut table = Table::new(["a", "b"]).unwrap();
        let err = table.push_row(vec![json!(1)]).unwrap_err();
        assert_eq!(
            err,
            TableError::ArityMismatch {
                row: 0,
                expected: 2,
                got: 1
            }
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_units_keep_position_and_values() {
        let table = sample();
        let units = table.units();
        assert_eq!(units.len(), 3);
        assert_eq!(units[1].position(), 1);
        assert_eq!(units[1].get("text"), Some(&json!("world")));
        assert_eq!(units[1].get("missing"), None);
        assert_eq!(units[2].to_json(), json!({"id": 3, "text": ""}));
    }

    #[test]
    fn test_column_values() {
        let table = sample();
        let ids = table.column_values("id").unwrap();
        assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3)]);
        assert!(matches!(
            table.column_values("nope"),
            Err(TableError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_from_records_unions_keys_in_order() {
        let records = vec![
            json!({"b": 1, "a": 2}),
            json!({"a": 3, "c": true}),
        ];
        let table = Table::from_json_values(records).unwrap();
        assert_eq!(table.column_names(), &["b", "a", "c"]);
        assert_eq!(table.row(1).unwrap(), &[Value::Null, json!(3), json!(true)]);
    }

    #[test]
    fn test_from_json_values_rejects_non_object() {
        let err = Table::from_json_values(vec![json!({"a": 1}), json!([1, 2])]).unwrap_err();
        assert_eq!(err, TableError::NotAnObject { row: 1 });
    }

    #[test]
    fn test_to_records_round_trip_order() {
        let table = sample();
        let records = table.to_records();
        let keys: Vec<_> = records[0].keys().cloned().collect();
        assert_eq!(keys, vec!["id".to_string(), "text".to_string()]);
    }

    #[test]
    fn test_with_appended_columns() {
        let table = sample();
        let out = table
            .with_appended_columns(
                &["api_response".to_string()],
                vec![vec![json!("x"), json!("y"), json!("z")]],
            )
            .unwrap();
        assert_eq!(out.column_names(), &["id", "text", "api_response"]);
        assert_eq!(out.len(), 3);
        assert_eq!(out.row(2).unwrap()[2], json!("z"));
    }

    #[test]
    fn test_chunk_units_last_batch_shorter() {
        let mut table = Table::new(["n"]).unwrap();
        for i in 0..7 {
            table.push_row(vec![json!(i)]).unwrap();
        }
        let batches = chunk_units(table.units(), 3);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[2].len(), 1);
        assert_eq!(batches[2].index(), 2);
        assert_eq!(batches[2].origin_of(0), Some(6));
        assert_eq!(batches[1].origin_of(5), None);
    }

    #[test]
    fn test_chunk_units_empty() {
        assert!(chunk_units(Vec::new(), 4).is_empty());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: chunking keeps every unit exactly once and in order.
        #[test]
        fn prop_chunk_units_preserves_order(rows in 0usize..60, size in 1usize..15) {
            let mut table = Table::new(["n"]).unwrap();
            for i in 0..rows {
                table.push_row(vec![json!(i)]).unwrap();
            }
            let batches = chunk_units(table.units(), size);

            prop_assert!(batches.iter().all(|b| b.len() <= size && !b.is_empty()));
            let flattened: Vec<usize> = batches
                .iter()
                .flat_map(|b| b.units().iter().map(Unit::position))
                .collect();
            prop_assert_eq!(flattened, (0..rows).collect::<Vec<_>>());
        }
    }
}
