//! MongoDB adapter.
//!
//! Executes the shared query contract against one collection of an
//! external MongoDB server. Filters, sorts and projections are translated
//! to native BSON; skip/limit and `count_documents` back the pagination
//! contract. The backend-native `_id` token is surfaced as a string under
//! the `id` output field on every read.
//!
//! String filters are plain equality here; the tabular/relational prefix
//! match is intentionally not replicated.

use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::{Collection, Database};
use serde_json::Value;
use strata_query::{
    reject_grouping, ConvertMode, Filter, FilterValue, Mutator, Page, PageFetcher, QuerySpec,
    Record, RecordId, Result, SchemaDescriptor, SortDirection, StoreError,
};
use tracing::{debug, error};

/// Output field carrying the stringified `_id` on read
const ID_FIELD: &str = "id";

fn to_bson(value: &Value) -> Result<Bson> {
    Bson::try_from(value.clone())
        .map_err(|e| StoreError::Serialization(format!("value to BSON failed: {}", e)))
}

/// `_id` values arrive as hex strings; parse them back into ObjectIds
/// when they are one
fn id_to_bson(value: &Value) -> Result<Bson> {
    if let Some(s) = value.as_str() {
        if let Ok(oid) = ObjectId::parse_str(s) {
            return Ok(Bson::ObjectId(oid));
        }
    }
    to_bson(value)
}

fn filter_key(field: &str) -> &str {
    if field == ID_FIELD {
        "_id"
    } else {
        field
    }
}

/// Translate a shared filter into a BSON filter document
fn build_filter(filter: Option<&Filter>) -> Result<Document> {
    let mut out = Document::new();
    let filter = match filter {
        Some(f) => f,
        None => return Ok(out),
    };
    for (field, clause) in filter {
        let key = filter_key(field);
        let is_id = key == "_id";
        match clause {
            FilterValue::Value(value) => {
                let bson = if is_id { id_to_bson(value)? } else { to_bson(value)? };
                out.insert(key, bson);
            }
            FilterValue::OneOf(options) => {
                let members: Result<Vec<Bson>> = options
                    .iter()
                    .map(|v| if is_id { id_to_bson(v) } else { to_bson(v) })
                    .collect();
                out.insert(key, doc! { "$in": members? });
            }
            FilterValue::Related(_) => {
                return Err(StoreError::unsupported(
                    "join filters are not supported by the mongodb adapter",
                ))
            }
        }
    }
    Ok(out)
}

fn build_sort(sort: &strata_query::Sort) -> Document {
    let direction = match sort.direction {
        SortDirection::Asc => 1,
        SortDirection::Desc => -1,
    };
    doc! { filter_key(&sort.field): direction }
}

fn build_projection(fields: &[String]) -> Document {
    let mut out = Document::new();
    for field in fields {
        out.insert(filter_key(field), 1);
    }
    out
}

/// Surface `_id` as a string under `id` and lift the rest to JSON
fn document_to_record(document: Document) -> Record {
    let mut out = Record::new();
    for (key, value) in document {
        if key == "_id" {
            let id = match value {
                Bson::ObjectId(oid) => oid.to_hex(),
                other => other.to_string(),
            };
            out.insert(ID_FIELD.to_string(), Value::from(id));
        } else {
            out.insert(key, Value::from(value));
        }
    }
    out
}

/// MongoDB adapter over one collection
pub struct MongoAdapter {
    db: Database,
    collection: String,
    descriptor: SchemaDescriptor,
}

impl MongoAdapter {
    /// Wrap an already-open database handle; connection lifecycle belongs
    /// to the caller
    pub fn new(db: Database, collection: impl Into<String>, descriptor: SchemaDescriptor) -> Self {
        Self {
            db,
            collection: collection.into(),
            descriptor,
        }
    }

    fn collection(&self) -> Collection<Document> {
        self.db.collection(&self.collection)
    }

    fn id_filter(&self, id: &RecordId) -> Result<Document> {
        let bson = id_to_bson(&id.to_value())?;
        Ok(doc! { "_id": bson })
    }

    fn backend_err(&self, op: &str, e: impl std::fmt::Display) -> StoreError {
        error!("MongoDB {} on '{}' failed: {}", op, self.collection, e);
        StoreError::backend(format!("mongodb {} failed: {}", op, e))
    }
}

#[async_trait]
impl PageFetcher for MongoAdapter {
    fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    async fn fetch_one(&self, id: &RecordId, convert: &ConvertMode) -> Result<Record> {
        let document = self
            .collection()
            .find_one(self.id_filter(id)?)
            .await
            .map_err(|e| self.backend_err("find_one", e))?
            .ok_or_else(|| StoreError::not_found(format!("identifier '{}'", id)))?;
        Ok(self.descriptor.convert(&document_to_record(document), convert))
    }

    async fn fetch_first(
        &self,
        filter: &Filter,
        fields: Option<&[String]>,
        convert: &ConvertMode,
    ) -> Result<Record> {
        let collection = self.collection();
        let mut find = collection.find_one(build_filter(Some(filter))?);
        if let Some(fields) = fields {
            self.descriptor.check_fields(fields)?;
            find = find.projection(build_projection(fields));
        }
        let document = find
            .await
            .map_err(|e| self.backend_err("find_one", e))?
            .ok_or_else(|| StoreError::not_found("no document matches the filter"))?;
        Ok(self.descriptor.convert(&document_to_record(document), convert))
    }

    async fn fetch_page(&self, spec: &QuerySpec) -> Result<Page> {
        reject_grouping(spec, "mongodb")?;
        let filter = build_filter(spec.filter.as_ref())?;

        let total_count = self
            .collection()
            .count_documents(filter.clone())
            .await
            .map_err(|e| self.backend_err("count_documents", e))?;

        let collection = self.collection();
        let mut find = collection.find(filter).skip(spec.offset as u64);
        if spec.limit >= 0 {
            find = find.limit(spec.limit);
        }
        if let Some(sort) = &spec.sort {
            find = find.sort(build_sort(sort));
        }
        if let Some(fields) = &spec.fields {
            self.descriptor.check_fields(fields)?;
            find = find.projection(build_projection(fields));
        }

        let mut cursor = find.await.map_err(|e| self.backend_err("find", e))?;
        let mut records = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| self.backend_err("cursor", e))?
        {
            records.push(
                self.descriptor
                    .convert(&document_to_record(document), &spec.convert),
            );
        }

        debug!(
            total = total_count,
            returned = records.len(),
            collection = %self.collection,
            "mongodb fetch_page"
        );
        Ok(Page {
            records,
            total_count,
        })
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<u64> {
        self.collection()
            .count_documents(build_filter(filter)?)
            .await
            .map_err(|e| self.backend_err("count_documents", e))
    }
}

#[async_trait]
impl Mutator for MongoAdapter {
    /// `_id` is assigned by the server; create cannot conflict
    async fn create(&self, input: Record) -> Result<Record> {
        let document = bson::to_document(&input)
            .map_err(|e| StoreError::Serialization(format!("record to BSON failed: {}", e)))?;
        let inserted = self
            .collection()
            .insert_one(document)
            .await
            .map_err(|e| self.backend_err("insert_one", e))?;
        let id = match inserted.inserted_id {
            Bson::ObjectId(oid) => RecordId::Text(oid.to_hex()),
            other => RecordId::Text(other.to_string()),
        };
        self.fetch_one(&id, &ConvertMode::Default).await
    }

    async fn edit(&self, id: &RecordId, patch: Record) -> Result<Record> {
        let set = bson::to_document(&patch)
            .map_err(|e| StoreError::Serialization(format!("patch to BSON failed: {}", e)))?;
        let outcome = self
            .collection()
            .update_one(self.id_filter(id)?, doc! { "$set": set })
            .await
            .map_err(|e| self.backend_err("update_one", e))?;
        if outcome.matched_count == 0 {
            return Err(StoreError::not_found(format!("identifier '{}'", id)));
        }
        self.fetch_one(id, &ConvertMode::Default).await
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        let outcome = self
            .collection()
            .delete_one(self.id_filter(id)?)
            .await
            .map_err(|e| self.backend_err("delete_one", e))?;
        if outcome.deleted_count == 0 {
            return Err(StoreError::not_found(format!("identifier '{}'", id)));
        }
        Ok(())
    }
}
