//! Column-major in-memory table with an identifier index.

use serde_json::Value;
use std::collections::HashMap;
use strata_query::value::{string_prefix_match, value_eq};
use strata_query::{Filter, FilterValue, Record, RecordId, Result, StoreError};

/// One clause against one field value; string scalars are prefix matches
pub(crate) fn clause_matches(value: &Value, clause: &FilterValue) -> Result<bool> {
    match clause {
        FilterValue::Value(Value::String(prefix)) => Ok(string_prefix_match(value, prefix)),
        FilterValue::Value(expected) => Ok(value_eq(value, expected)),
        FilterValue::OneOf(options) => Ok(options.iter().any(|o| value_eq(value, o))),
        FilterValue::Related(_) => Err(StoreError::unsupported(
            "join filters are not supported by the tabular adapter",
        )),
    }
}

/// In-memory columnar table: ordered column names, one value vector per
/// column, and an identifier-to-row index. The identifier column is always
/// first.
#[derive(Debug, Clone)]
pub struct ColumnTable {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
    id_column: String,
    index: HashMap<RecordId, usize>,
}

impl ColumnTable {
    /// Create an empty table over the given columns
    pub fn new(columns: Vec<String>, id_column: impl Into<String>) -> Result<Self> {
        let id_column = id_column.into();
        let mut ordered = vec![id_column.clone()];
        for c in columns {
            if c != id_column && !ordered.contains(&c) {
                ordered.push(c);
            }
        }
        let data = vec![Vec::new(); ordered.len()];
        Ok(Self {
            columns: ordered,
            data,
            id_column,
            index: HashMap::new(),
        })
    }

    /// Build a table from records; columns are the union of record fields
    /// in first-seen order, identifier column first.
    pub fn from_records(records: Vec<Record>, id_column: Option<&str>) -> Result<Self> {
        let id_column = id_column.unwrap_or("id").to_string();
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for field in record.keys() {
                if field != &id_column && !columns.contains(field) {
                    columns.push(field.clone());
                }
            }
        }
        let mut table = Self::new(columns, id_column)?;
        for record in records {
            table.insert(record)?;
        }
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn len(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Fail with `SchemaMismatch` unless every field is a known column
    pub fn check_columns<'a>(&self, fields: impl IntoIterator<Item = &'a String>) -> Result<()> {
        let unknown: Vec<&str> = fields
            .into_iter()
            .filter(|f| !self.has_column(f))
            .map(String::as_str)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(StoreError::schema_mismatch(format!(
                "columns {:?} not present in table",
                unknown
            )))
        }
    }

    fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// One row as a record; null cells are omitted
    pub fn row(&self, row: usize) -> Record {
        let mut out = Record::new();
        for (col, values) in self.columns.iter().zip(&self.data) {
            match values.get(row) {
                Some(Value::Null) | None => {}
                Some(v) => {
                    out.insert(col.clone(), v.clone());
                }
            }
        }
        out
    }

    /// All rows in storage order
    pub fn records(&self) -> Vec<Record> {
        (0..self.len()).map(|i| self.row(i)).collect()
    }

    /// Row index for an identifier
    pub fn position_of(&self, id: &RecordId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Row indices matching the filter, computed as a boolean mask per
    /// clause over the column vectors
    pub fn filter_mask(&self, filter: &Filter) -> Result<Vec<usize>> {
        let mut mask = vec![true; self.len()];
        for (field, clause) in filter {
            let position = self.column_position(field).ok_or_else(|| {
                StoreError::schema_mismatch(format!("column '{}' not present in table", field))
            })?;
            let column = &self.data[position];
            for (row, keep) in mask.iter_mut().enumerate() {
                if *keep {
                    *keep = clause_matches(&column[row], clause)?;
                }
            }
        }
        Ok(mask
            .into_iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect())
    }

    fn record_id_of(&self, record: &Record) -> Result<RecordId> {
        let raw = record.get(&self.id_column).ok_or_else(|| {
            StoreError::invalid_operation(format!(
                "record is missing the identifier column '{}'",
                self.id_column
            ))
        })?;
        RecordId::from_value(raw).ok_or_else(|| {
            StoreError::invalid_operation(format!("'{}' is not usable as an identifier", raw))
        })
    }

    /// Append a row; fails with `Conflict` when the identifier pre-exists
    pub fn insert(&mut self, record: Record) -> Result<Record> {
        let id = self.record_id_of(&record)?;
        if self.index.contains_key(&id) {
            return Err(StoreError::conflict(format!(
                "identifier '{}' already exists",
                id
            )));
        }
        self.check_columns(record.keys())?;

        let row = self.len();
        for (col, values) in self.columns.iter().zip(self.data.iter_mut()) {
            values.push(record.get(col).cloned().unwrap_or(Value::Null));
        }
        self.index.insert(id, row);
        Ok(self.row(row))
    }

    /// Partial update by identifier; only the patched cells change
    pub fn edit(&mut self, id: &RecordId, patch: &Record) -> Result<Record> {
        let row = self
            .position_of(id)
            .ok_or_else(|| StoreError::not_found(format!("identifier '{}'", id)))?;
        self.check_columns(patch.keys())?;

        if let Some(raw) = patch.get(&self.id_column) {
            let new_id = RecordId::from_value(raw).ok_or_else(|| {
                StoreError::invalid_operation(format!("'{}' is not usable as an identifier", raw))
            })?;
            if new_id != *id {
                if self.index.contains_key(&new_id) {
                    return Err(StoreError::conflict(format!(
                        "identifier '{}' already exists",
                        new_id
                    )));
                }
                self.index.remove(id);
                self.index.insert(new_id, row);
            }
        }

        for (field, value) in patch {
            if let Some(position) = self.column_position(field) {
                self.data[position][row] = value.clone();
            }
        }
        Ok(self.row(row))
    }

    /// Remove a row by identifier
    pub fn delete(&mut self, id: &RecordId) -> Result<()> {
        let row = self
            .position_of(id)
            .ok_or_else(|| StoreError::not_found(format!("identifier '{}'", id)))?;
        for values in &mut self.data {
            values.remove(row);
        }
        self.index.remove(id);
        for position in self.index.values_mut() {
            if *position > row {
                *position -= 1;
            }
        }
        Ok(())
    }

    /// Raw cell access for the persistence codec
    pub(crate) fn cell(&self, column: usize, row: usize) -> &Value {
        &self.data[column][row]
    }
}
