use crate::error::{Result, StoreError};
use crate::schema::{ConvertMode, SchemaDescriptor};
use crate::types::{Filter, Page, QuerySpec, Record, RecordId};
use async_trait::async_trait;

/// Read side of the adapter contract, shared by every backend variant
///
/// All four adapters must produce the same observable result for the same
/// [`QuerySpec`] on identical data, up to the documented per-backend string
/// filter divergence. Group-by/simplify support is a capability flag, not an
/// overridden no-op: adapters without it reject such specs with
/// [`StoreError::Unsupported`].
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Schema bundle for this collection
    fn descriptor(&self) -> &SchemaDescriptor;

    /// Whether this adapter executes group-by/simplify/weighting
    fn supports_grouping(&self) -> bool {
        false
    }

    /// Fetch one record by identifier; `NotFound` when it misses
    async fn fetch_one(&self, id: &RecordId, convert: &ConvertMode) -> Result<Record>;

    /// First match under implementation-defined order; `NotFound` when the
    /// filter matches nothing
    async fn fetch_first(
        &self,
        filter: &Filter,
        fields: Option<&[String]>,
        convert: &ConvertMode,
    ) -> Result<Record>;

    /// Execute a full query specification and return one page plus the
    /// pre-pagination match count
    async fn fetch_page(&self, spec: &QuerySpec) -> Result<Page>;

    /// Match count under the same filter semantics as `fetch_page`
    async fn count(&self, filter: Option<&Filter>) -> Result<u64>;
}

/// Write side of the adapter contract
#[async_trait]
pub trait Mutator: PageFetcher {
    /// Insert one record
    ///
    /// Externally-keyed adapters fail with `Conflict` when the identifier
    /// already exists; auto-assigning adapters cannot conflict.
    async fn create(&self, input: Record) -> Result<Record>;

    /// Partial update: only fields present in `patch` change
    async fn edit(&self, id: &RecordId, patch: Record) -> Result<Record>;

    /// Remove one record; `NotFound` when absent
    async fn delete(&self, id: &RecordId) -> Result<()>;

    /// Return the first record matching `filter`, creating one from `input`
    /// when nothing matches
    async fn fetch_or_create(&self, filter: &Filter, input: Record) -> Result<Record> {
        match self.fetch_first(filter, None, &ConvertMode::Default).await {
            Ok(found) => Ok(found),
            Err(StoreError::NotFound(_)) => self.create(input).await,
            Err(e) => Err(e),
        }
    }
}

/// Reject the spec portions this adapter does not execute
///
/// Shared guard for the three adapters without the aggregation pipeline.
pub fn reject_grouping(spec: &QuerySpec, adapter: &str) -> Result<()> {
    if spec.group_by.is_some() || spec.simplify.is_some() {
        return Err(StoreError::unsupported(format!(
            "group-by/simplify is not supported by the {} adapter",
            adapter
        )));
    }
    if spec.weight_field.is_some() {
        return Err(StoreError::unsupported(format!(
            "weighting is not supported by the {} adapter",
            adapter
        )));
    }
    Ok(())
}
