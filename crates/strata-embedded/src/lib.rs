//! Embedded per-process document store adapter.
//!
//! Documents live in an in-process ordered map keyed by monotonically
//! assigned integer doc ids, with linear-scan filtering and in-memory
//! sorting. String filters are plain equality here (unlike the
//! tabular/relational prefix match; the divergence is intentional and
//! preserved). Optionally the whole store is snapshotted to a JSON file
//! after every mutation.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use strata_query::pipeline;
use strata_query::value::value_eq;
use strata_query::{
    reject_grouping, ConvertMode, Filter, FilterValue, Mutator, Page, PageFetcher, QuerySpec,
    Record, RecordId, Result, SchemaDescriptor, StoreError,
};
use tokio::sync::RwLock;
use tracing::debug;

/// Output field carrying the doc id on read
const ID_FIELD: &str = "id";

#[derive(Debug, Default)]
struct DocStore {
    docs: BTreeMap<i64, Record>,
    next_id: i64,
}

impl DocStore {
    fn materialize(&self, doc_id: i64, doc: &Record) -> Record {
        let mut out = Record::new();
        out.insert(ID_FIELD.to_string(), Value::from(doc_id));
        for (k, v) in doc {
            if k != ID_FIELD {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    fn doc_id_of(id: &RecordId) -> Result<i64> {
        match id {
            RecordId::Int(n) => Ok(*n),
            RecordId::Text(s) => s.parse().map_err(|_| {
                StoreError::invalid_operation(format!("'{}' is not an embedded doc id", s))
            }),
        }
    }
}

/// Equality-only clause matching (string equality, list membership)
fn clause_matches(value: &Value, clause: &FilterValue) -> Result<bool> {
    match clause {
        FilterValue::Value(expected) => Ok(value_eq(value, expected)),
        FilterValue::OneOf(options) => Ok(options.iter().any(|o| value_eq(value, o))),
        FilterValue::Related(_) => Err(StoreError::unsupported(
            "join filters are not supported by the embedded adapter",
        )),
    }
}

fn matches(record: &Record, filter: &Filter) -> Result<bool> {
    for (field, clause) in filter {
        let value = record.get(field).unwrap_or(&Value::Null);
        if !clause_matches(value, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Embedded document store adapter over one logical collection
pub struct EmbeddedAdapter {
    store: RwLock<DocStore>,
    descriptor: SchemaDescriptor,
    snapshot_path: Option<PathBuf>,
}

impl EmbeddedAdapter {
    pub fn new(descriptor: SchemaDescriptor) -> Self {
        Self {
            store: RwLock::new(DocStore::default()),
            descriptor,
            snapshot_path: None,
        }
    }

    /// Seed the store with documents; doc ids are assigned in order
    pub async fn with_documents(self, documents: Vec<Record>) -> Result<Self> {
        {
            let mut store = self.store.write().await;
            for doc in documents {
                let doc_id = store.next_id + 1;
                store.next_id = doc_id;
                store.docs.insert(doc_id, doc);
            }
        }
        Ok(self)
    }

    /// Snapshot the whole store to a JSON file after every mutation
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Rebuild a store from a snapshot file
    pub async fn load_snapshot(
        path: impl Into<PathBuf>,
        descriptor: SchemaDescriptor,
    ) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| StoreError::backend(format!("read from {}: {}", path.display(), e)))?;
        let docs: BTreeMap<i64, Record> = serde_json::from_str(&text)
            .map_err(|e| StoreError::Serialization(format!("snapshot decode failed: {}", e)))?;
        let next_id = docs.keys().next_back().copied().unwrap_or(0);
        let adapter = Self {
            store: RwLock::new(DocStore { docs, next_id }),
            descriptor,
            snapshot_path: Some(path),
        };
        Ok(adapter)
    }

    fn snapshot(&self, store: &DocStore) -> Result<()> {
        if let Some(path) = &self.snapshot_path {
            let text = serde_json::to_string(&store.docs)
                .map_err(|e| StoreError::Serialization(format!("snapshot encode failed: {}", e)))?;
            std::fs::write(path, text)
                .map_err(|e| StoreError::backend(format!("write to {}: {}", path.display(), e)))?;
            debug!("Snapshotted {} documents to {}", store.docs.len(), path.display());
        }
        Ok(())
    }

    async fn scan(&self, filter: Option<&Filter>) -> Result<Vec<Record>> {
        let store = self.store.read().await;
        let mut rows = Vec::new();
        for (doc_id, doc) in &store.docs {
            let row = store.materialize(*doc_id, doc);
            let keep = match filter {
                Some(filter) => matches(&row, filter)?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl PageFetcher for EmbeddedAdapter {
    fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    async fn fetch_one(&self, id: &RecordId, convert: &ConvertMode) -> Result<Record> {
        let doc_id = DocStore::doc_id_of(id)?;
        let store = self.store.read().await;
        let doc = store
            .docs
            .get(&doc_id)
            .ok_or_else(|| StoreError::not_found(format!("doc id '{}'", doc_id)))?;
        Ok(self
            .descriptor
            .convert(&store.materialize(doc_id, doc), convert))
    }

    async fn fetch_first(
        &self,
        filter: &Filter,
        fields: Option<&[String]>,
        convert: &ConvertMode,
    ) -> Result<Record> {
        let rows = self.scan(Some(filter)).await?;
        let mut first = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("no document matches the filter"))?;
        if let Some(fields) = fields {
            self.descriptor.check_fields(fields)?;
            first = pipeline::project(std::slice::from_ref(&first), fields)
                .pop()
                .unwrap_or_default();
        }
        Ok(self.descriptor.convert(&first, convert))
    }

    async fn fetch_page(&self, spec: &QuerySpec) -> Result<Page> {
        reject_grouping(spec, "embedded")?;
        if let Some(fields) = &spec.fields {
            self.descriptor.check_fields(fields)?;
        }

        let mut rows = self.scan(spec.filter.as_ref()).await?;
        if let Some(sort) = &spec.sort {
            pipeline::sort_rows(&mut rows, sort);
        }

        let total_count = rows.len() as u64;
        let mut rows = pipeline::window(rows, spec.offset, spec.limit);
        if let Some(fields) = &spec.fields {
            rows = pipeline::project(&rows, fields);
        }
        let records = rows
            .iter()
            .map(|r| self.descriptor.convert(r, &spec.convert))
            .collect();

        debug!(total = total_count, "embedded fetch_page");
        Ok(Page {
            records,
            total_count,
        })
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<u64> {
        Ok(self.scan(filter).await?.len() as u64)
    }
}

#[async_trait]
impl Mutator for EmbeddedAdapter {
    /// Doc ids are auto-assigned; create cannot conflict
    async fn create(&self, input: Record) -> Result<Record> {
        let mut store = self.store.write().await;
        let doc_id = store.next_id + 1;
        store.next_id = doc_id;
        store.docs.insert(doc_id, input);
        self.snapshot(&store)?;
        let doc = &store.docs[&doc_id];
        Ok(self
            .descriptor
            .convert(&store.materialize(doc_id, doc), &ConvertMode::Default))
    }

    async fn edit(&self, id: &RecordId, patch: Record) -> Result<Record> {
        let doc_id = DocStore::doc_id_of(id)?;
        let mut store = self.store.write().await;
        let doc = store
            .docs
            .get_mut(&doc_id)
            .ok_or_else(|| StoreError::not_found(format!("doc id '{}'", doc_id)))?;
        for (field, value) in patch {
            doc.insert(field, value);
        }
        self.snapshot(&store)?;
        let doc = &store.docs[&doc_id];
        Ok(self
            .descriptor
            .convert(&store.materialize(doc_id, doc), &ConvertMode::Default))
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        let doc_id = DocStore::doc_id_of(id)?;
        let mut store = self.store.write().await;
        store
            .docs
            .remove(&doc_id)
            .ok_or_else(|| StoreError::not_found(format!("doc id '{}'", doc_id)))?;
        self.snapshot(&store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_query::{GroupBy, RecordShape, Reduce, Sort};

    fn record(pairs: &[(&str, Value)]) -> Record {
        let mut r = Record::new();
        for (k, v) in pairs {
            r.insert((*k).to_string(), v.clone());
        }
        r
    }

    fn descriptor() -> SchemaDescriptor {
        SchemaDescriptor::uniform(RecordShape::new("person", ["name", "age"]))
    }

    async fn adapter() -> EmbeddedAdapter {
        EmbeddedAdapter::new(descriptor())
            .with_documents(vec![
                record(&[("name", json!("banana")), ("age", json!(30))]),
                record(&[("name", json!("Apple")), ("age", json!(25))]),
                record(&[("name", json!("cherry")), ("age", json!(30))]),
            ])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn string_filters_are_equality_not_prefix() {
        let a = adapter().await;
        let prefix = Filter::from([("name".to_string(), FilterValue::eq("ba"))]);
        assert_eq!(a.count(Some(&prefix)).await.unwrap(), 0);

        let exact = Filter::from([("name".to_string(), FilterValue::eq("banana"))]);
        assert_eq!(a.count(Some(&exact)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn doc_ids_are_assigned_in_order() {
        let a = adapter().await;
        let one = a.fetch_one(&RecordId::Int(2), &ConvertMode::Raw).await.unwrap();
        assert_eq!(one.get("name"), Some(&json!("Apple")));
    }

    #[tokio::test]
    async fn create_auto_assigns_and_surfaces_id() {
        let a = adapter().await;
        let created = a.create(record(&[("name", json!("durian"))])).await.unwrap();
        assert_eq!(created.get(ID_FIELD), Some(&json!(4)));
    }

    #[tokio::test]
    async fn edit_is_partial_and_delete_misses_are_not_found() {
        let a = adapter().await;
        let updated = a
            .edit(&RecordId::Int(1), record(&[("age", json!(31))]))
            .await
            .unwrap();
        assert_eq!(updated.get("age"), Some(&json!(31)));
        assert_eq!(updated.get("name"), Some(&json!("banana")));

        let err = a.delete(&RecordId::Int(99)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn group_by_is_unsupported() {
        let a = adapter().await;
        let err = a
            .fetch_page(&QuerySpec::new().with_group_by(GroupBy::new(["age"], Reduce::Count)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }

    #[tokio::test]
    async fn page_sorts_and_windows() {
        let a = adapter().await;
        let page = a
            .fetch_page(
                &QuerySpec::new()
                    .with_sort(Sort::asc("name"))
                    .with_window(1, 1)
                    .with_convert(ConvertMode::Raw),
            )
            .await
            .unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.records[0].get("name"), Some(&json!("banana")));
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.json");
        let a = adapter().await.with_snapshot(&path);
        a.create(record(&[("name", json!("durian")), ("age", json!(7))]))
            .await
            .unwrap();

        let reloaded = EmbeddedAdapter::load_snapshot(&path, descriptor())
            .await
            .unwrap();
        assert_eq!(reloaded.count(None).await.unwrap(), 4);
        let created = reloaded
            .create(record(&[("name", json!("elder"))]))
            .await
            .unwrap();
        // next_id resumes past the highest snapshotted doc id
        assert_eq!(created.get(ID_FIELD), Some(&json!(5)));
    }
}
