//! In-memory tabular adapter.
//!
//! Backed by a column-major [`ColumnTable`], one per collection, optionally
//! persisted to a flat delimited file after every mutation. This is the
//! only adapter that executes the full pipeline: weighting, filtering,
//! group-by reduction, simplification, sorting, windowing and schema
//! conversion all run in-process over the column vectors.
//!
//! The adapter owns no synchronization beyond its own table lock and is
//! intended for single-writer use (one process owning a file-backed table);
//! serializing concurrent writers is the handle owner's responsibility.

mod file;
mod table;

pub use table::ColumnTable;

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use strata_query::pipeline::{self, Grouped};
use strata_query::{
    ConvertMode, Filter, Mutator, Page, PageFetcher, QuerySpec, Record, RecordId, Result,
    SchemaDescriptor, StoreError,
};
use tokio::sync::RwLock;
use tracing::debug;

/// Tabular adapter over one in-memory collection
pub struct TabularAdapter {
    table: RwLock<ColumnTable>,
    descriptor: SchemaDescriptor,
    persist_path: Option<PathBuf>,
}

impl TabularAdapter {
    pub fn new(table: ColumnTable, descriptor: SchemaDescriptor) -> Self {
        Self {
            table: RwLock::new(table),
            descriptor,
            persist_path: None,
        }
    }

    /// Build the table from plain records; the descriptor's identifier
    /// field keys the rows
    pub fn from_records(records: Vec<Record>, descriptor: SchemaDescriptor) -> Result<Self> {
        let table = ColumnTable::from_records(records, Some(&descriptor.id_field))?;
        Ok(Self::new(table, descriptor))
    }

    /// Load the table from a previously persisted flat file and keep
    /// writing back to it on every mutation
    pub fn load_from(path: impl Into<PathBuf>, descriptor: SchemaDescriptor) -> Result<Self> {
        let path = path.into();
        let table = file::load(&path)?;
        Ok(Self {
            table: RwLock::new(table),
            descriptor,
            persist_path: Some(path),
        })
    }

    /// Rewrite the backing file after every mutation
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    fn persist(&self, table: &ColumnTable) -> Result<()> {
        if let Some(path) = &self.persist_path {
            file::save(table, path.as_path())?;
        }
        Ok(())
    }

    /// Persisted file location, when configured
    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    fn record_matches(record: &Record, filter: &Filter) -> Result<bool> {
        for (field, clause) in filter {
            let value = record.get(field).unwrap_or(&Value::Null);
            if !table::clause_matches(value, clause)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Steps 1-4 of the pipeline: weighting, filtering, grouping and
    /// simplification, producing the pre-sort row set
    fn filtered_rows(table: &ColumnTable, spec: &QuerySpec) -> Result<Vec<Record>> {
        if let Some(fields) = &spec.fields {
            table.check_columns(fields)?;
        }

        let rows = match &spec.weight_field {
            Some(weight_field) => {
                let fields = spec.fields.as_ref().ok_or_else(|| {
                    StoreError::invalid_operation(
                        "weight_field requires an explicit field projection",
                    )
                })?;
                table.check_columns(std::iter::once(weight_field))?;
                let mut rows = table.records();
                pipeline::apply_weight(&mut rows, fields, weight_field);
                match &spec.filter {
                    Some(filter) => {
                        table.check_columns(filter.keys())?;
                        let mut kept = Vec::with_capacity(rows.len());
                        for row in rows {
                            if Self::record_matches(&row, filter)? {
                                kept.push(row);
                            }
                        }
                        kept
                    }
                    None => rows,
                }
            }
            None => match &spec.filter {
                Some(filter) => table
                    .filter_mask(filter)?
                    .into_iter()
                    .map(|i| table.row(i))
                    .collect(),
                None => table.records(),
            },
        };

        let group = match &spec.group_by {
            Some(group) => group,
            None => {
                if spec.simplify.is_some() {
                    return Err(StoreError::invalid_operation(
                        "simplify requires group_by",
                    ));
                }
                return Ok(rows);
            }
        };

        table.check_columns(&group.fields)?;
        let grouped = pipeline::group_reduce(&rows, group, spec.fields.as_deref())?;
        let Grouped { rows, .. } = match &spec.simplify {
            Some(simplify) => pipeline::simplify_rows(grouped, simplify, group.reduce),
            None => grouped,
        };
        Ok(rows)
    }
}

#[async_trait]
impl PageFetcher for TabularAdapter {
    fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    fn supports_grouping(&self) -> bool {
        true
    }

    async fn fetch_one(&self, id: &RecordId, convert: &ConvertMode) -> Result<Record> {
        let table = self.table.read().await;
        let row = table
            .position_of(id)
            .ok_or_else(|| StoreError::not_found(format!("identifier '{}'", id)))?;
        Ok(self.descriptor.convert(&table.row(row), convert))
    }

    async fn fetch_first(
        &self,
        filter: &Filter,
        fields: Option<&[String]>,
        convert: &ConvertMode,
    ) -> Result<Record> {
        let table = self.table.read().await;
        let rows = table.filter_mask(filter)?;
        let first = *rows
            .first()
            .ok_or_else(|| StoreError::not_found("no record matches the filter"))?;
        let mut record = table.row(first);
        if let Some(fields) = fields {
            table.check_columns(fields)?;
            record = pipeline::project(std::slice::from_ref(&record), fields)
                .pop()
                .unwrap_or_default();
        }
        Ok(self.descriptor.convert(&record, convert))
    }

    async fn fetch_page(&self, spec: &QuerySpec) -> Result<Page> {
        let table = self.table.read().await;
        let mut rows = Self::filtered_rows(&table, spec)?;
        drop(table);

        if let Some(sort) = &spec.sort {
            pipeline::sort_rows(&mut rows, sort);
        }

        let total_count = rows.len() as u64;
        let mut rows = pipeline::window(rows, spec.offset, spec.limit);

        let records = if spec.group_by.is_some() {
            // Aggregated rows have their own shape; they bypass the
            // collection schema.
            rows
        } else {
            if let Some(fields) = &spec.fields {
                rows = pipeline::project(&rows, fields);
            }
            rows.iter()
                .map(|r| self.descriptor.convert(r, &spec.convert))
                .collect()
        };

        debug!(
            total = total_count,
            returned = records.len(),
            "tabular fetch_page"
        );
        Ok(Page {
            records,
            total_count,
        })
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<u64> {
        let table = self.table.read().await;
        match filter {
            Some(filter) => Ok(table.filter_mask(filter)?.len() as u64),
            None => Ok(table.len() as u64),
        }
    }
}

#[async_trait]
impl Mutator for TabularAdapter {
    async fn create(&self, input: Record) -> Result<Record> {
        let mut table = self.table.write().await;
        let stored = table.insert(input)?;
        self.persist(&table)?;
        Ok(self.descriptor.convert(&stored, &ConvertMode::Default))
    }

    async fn edit(&self, id: &RecordId, patch: Record) -> Result<Record> {
        let mut table = self.table.write().await;
        let updated = table.edit(id, &patch)?;
        self.persist(&table)?;
        Ok(self.descriptor.convert(&updated, &ConvertMode::Default))
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        let mut table = self.table.write().await;
        table.delete(id)?;
        self.persist(&table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_query::{FilterValue, GroupBy, RecordShape, Reduce, Sort};

    fn record(pairs: &[(&str, Value)]) -> Record {
        let mut r = Record::new();
        for (k, v) in pairs {
            r.insert((*k).to_string(), v.clone());
        }
        r
    }

    fn descriptor() -> SchemaDescriptor {
        SchemaDescriptor::uniform(RecordShape::new("person", ["name", "age", "city"]))
    }

    fn adapter() -> TabularAdapter {
        TabularAdapter::from_records(
            vec![
                record(&[("id", json!(1)), ("name", json!("banana")), ("age", json!(30)), ("city", json!("Lisbon"))]),
                record(&[("id", json!(2)), ("name", json!("Apple")), ("age", json!(25)), ("city", json!("Porto"))]),
                record(&[("id", json!(3)), ("name", json!("cherry")), ("age", json!(30)), ("city", json!("Lisbon"))]),
            ],
            descriptor(),
        )
        .unwrap()
    }

    fn ids(page: &Page) -> Vec<i64> {
        page.records
            .iter()
            .map(|r| r.get("id").and_then(Value::as_i64).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn sort_is_case_insensitive() {
        let page = adapter()
            .fetch_page(&QuerySpec::new().with_sort(Sort::asc("name")))
            .await
            .unwrap();
        let names: Vec<_> = page
            .records
            .iter()
            .map(|r| r.get("name").cloned().unwrap())
            .collect();
        assert_eq!(names, vec![json!("Apple"), json!("banana"), json!("cherry")]);
    }

    #[tokio::test]
    async fn total_count_precedes_windowing() {
        let page = adapter()
            .fetch_page(
                &QuerySpec::new()
                    .with_filter_field("age", FilterValue::eq(30))
                    .with_sort(Sort::asc("id"))
                    .with_window(1, 1),
            )
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(ids(&page), vec![3]);
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let page = adapter()
            .fetch_page(&QuerySpec::new().with_filter_field("age", FilterValue::eq(99)))
            .await
            .unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn create_conflicts_and_leaves_store_unchanged() {
        let a = adapter();
        let err = a
            .create(record(&[("id", json!(1)), ("name", json!("dup"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(a.count(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn edit_is_partial() {
        let a = adapter();
        let updated = a
            .edit(&RecordId::Int(2), record(&[("age", json!(26))]))
            .await
            .unwrap();
        assert_eq!(updated.get("age"), Some(&json!(26)));
        assert_eq!(updated.get("name"), Some(&json!("Apple")));
        assert_eq!(updated.get("city"), Some(&json!("Porto")));
    }

    #[tokio::test]
    async fn weight_without_fields_is_invalid() {
        let err = adapter()
            .fetch_page(&QuerySpec::new().with_weight_field("age"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn weighted_projection_multiplies_values() {
        let page = adapter()
            .fetch_page(
                &QuerySpec::new()
                    .with_fields(["age"])
                    .with_weight_field("id")
                    .with_sort(Sort::asc("age"))
                    .with_convert(ConvertMode::Raw),
            )
            .await
            .unwrap();
        let ages: Vec<_> = page
            .records
            .iter()
            .map(|r| r.get("age").cloned().unwrap())
            .collect();
        // age * id: 30*1, 25*2, 30*3 sorted ascending
        assert_eq!(ages, vec![json!(30), json!(50), json!(90)]);
    }

    #[tokio::test]
    async fn group_by_city_counts() {
        let page = adapter()
            .fetch_page(&QuerySpec::new().with_group_by(GroupBy::new(["city"], Reduce::Count)))
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.records[0].get("city"), Some(&json!("Lisbon")));
    }

    #[tokio::test]
    async fn unknown_projection_field_is_schema_mismatch() {
        let err = adapter()
            .fetch_page(&QuerySpec::new().with_fields(["nope"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn fetch_first_honors_filter_and_fields() {
        let a = adapter();
        let filter = Filter::from([("city".to_string(), FilterValue::eq("Lisbon"))]);
        let fields = vec!["name".to_string()];
        let first = a
            .fetch_first(&filter, Some(&fields), &ConvertMode::Raw)
            .await
            .unwrap();
        assert_eq!(first.get("name"), Some(&json!("banana")));
        assert!(first.get("age").is_none());

        let miss = Filter::from([("city".to_string(), FilterValue::eq("Berlin"))]);
        let err = a.fetch_first(&miss, None, &ConvertMode::Raw).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn mutations_write_through_to_the_flat_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.tsv");
        let a = adapter().with_persistence(&path);

        a.create(record(&[("id", json!(4)), ("name", json!("durian"))]))
            .await
            .unwrap();
        assert!(path.exists());

        let reloaded = TabularAdapter::load_from(&path, descriptor()).unwrap();
        assert_eq!(reloaded.count(None).await.unwrap(), 4);
        let one = reloaded
            .fetch_one(&RecordId::Int(4), &ConvertMode::Raw)
            .await
            .unwrap();
        assert_eq!(one.get("name"), Some(&json!("durian")));
    }

    #[tokio::test]
    async fn fetch_or_create_returns_existing_match() {
        let a = adapter();
        let filter = Filter::from([("name".to_string(), FilterValue::eq("Apple"))]);
        let found = a
            .fetch_or_create(&filter, record(&[("id", json!(9)), ("name", json!("new"))]))
            .await
            .unwrap();
        assert_eq!(found.get("id"), Some(&json!(2)));
        assert_eq!(a.count(None).await.unwrap(), 3);
    }
}
