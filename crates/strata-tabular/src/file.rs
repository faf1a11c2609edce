//! Flat-file persistence for [`ColumnTable`].
//!
//! Layout: a header row of field names (identifier column first), then one
//! line per row with every cell JSON-encoded and joined by a tab. JSON
//! escaping keeps literal tabs and newlines out of cells, so the format
//! needs no quoting rules of its own. The file is rewritten in full after
//! every mutation; a crash mid-write can corrupt it (no partial-write
//! recovery).

use crate::table::ColumnTable;
use serde_json::Value;
use std::path::Path;
use strata_query::{Record, Result, StoreError};
use tracing::debug;

const DELIMITER: char = '\t';

/// Write the whole table to `path`
pub fn save(table: &ColumnTable, path: &Path) -> Result<()> {
    let mut out = String::new();
    out.push_str(&table.columns().join("\t"));
    out.push('\n');

    for row in 0..table.len() {
        let mut cells = Vec::with_capacity(table.columns().len());
        for column in 0..table.columns().len() {
            let encoded = serde_json::to_string(table.cell(column, row))
                .map_err(|e| StoreError::Serialization(format!("cell encode failed: {}", e)))?;
            cells.push(encoded);
        }
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }

    std::fs::write(path, out)
        .map_err(|e| StoreError::backend(format!("write to {}: {}", path.display(), e)))?;
    debug!("Persisted {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Load a table from `path`; the first header column is the identifier
pub fn load(path: &Path) -> Result<ColumnTable> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| StoreError::backend(format!("read from {}: {}", path.display(), e)))?;

    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| StoreError::backend(format!("{}: missing header row", path.display())))?;
    let columns: Vec<String> = header.split(DELIMITER).map(str::to_string).collect();
    let id_column = columns
        .first()
        .cloned()
        .ok_or_else(|| StoreError::backend(format!("{}: empty header row", path.display())))?;

    let mut records = Vec::new();
    for (number, line) in lines.enumerate() {
        if line.is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split(DELIMITER).collect();
        if cells.len() != columns.len() {
            return Err(StoreError::backend(format!(
                "{}: row {} has {} cells, expected {}",
                path.display(),
                number + 1,
                cells.len(),
                columns.len()
            )));
        }
        let mut record = Record::new();
        for (column, cell) in columns.iter().zip(cells) {
            let value: Value = serde_json::from_str(cell).map_err(|e| {
                StoreError::Serialization(format!(
                    "{}: row {} cell decode failed: {}",
                    path.display(),
                    number + 1,
                    e
                ))
            })?;
            if value != Value::Null {
                record.insert(column.clone(), value);
            }
        }
        records.push(record);
    }

    debug!("Loaded {} rows from {}", records.len(), path.display());
    ColumnTable::from_records(records, Some(&id_column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_query::RecordId;

    fn record(pairs: &[(&str, Value)]) -> Record {
        let mut r = Record::new();
        for (k, v) in pairs {
            r.insert((*k).to_string(), v.clone());
        }
        r
    }

    #[test]
    fn round_trips_through_the_flat_file() {
        let table = ColumnTable::from_records(
            vec![
                record(&[("id", json!(1)), ("name", json!("tab\tand\nnewline"))]),
                record(&[("id", json!(2)), ("score", json!(4.5))]),
            ],
            None,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.tsv");
        save(&table, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.columns(), table.columns());
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.row(0).get("name"),
            Some(&json!("tab\tand\nnewline"))
        );
        // Row 2 had no name; the null cell is omitted on read.
        assert!(loaded.row(1).get("name").is_none());
        assert!(loaded.position_of(&RecordId::Int(2)).is_some());
    }

    #[test]
    fn load_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "id\tname\n1\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
