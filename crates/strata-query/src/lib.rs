//! # strata-query
//!
//! Core abstractions for running one logical query shape against
//! heterogeneous storage backends.
//!
//! A [`QuerySpec`] describes a filter/sort/project/paginate/aggregate
//! query as pure data. Backend adapter crates execute it under a single
//! shared contract so the same spec produces the same rows, order and
//! count no matter which store answers it:
//!
//! - `strata-tabular`: in-memory columnar table (the only adapter with
//!   group-by, simplify and weighting)
//! - `strata-relational`: sea-orm entities over a relational session
//! - `strata-mongodb`: MongoDB collections
//! - `strata-embedded`: embedded per-process document store
//!
//! ## Architecture
//!
//! Adapter capabilities are split across two traits:
//!
//! - **PageFetcher**: `fetch_one` / `fetch_first` / `fetch_page` / `count`
//! - **Mutator**: `create` / `edit` / `delete` (+ `fetch_or_create`)
//!
//! Raw backend rows pass through a per-collection [`SchemaDescriptor`],
//! which projects them into one of four declared record shapes. The
//! [`pipeline`] module holds the group-by/simplify machinery and the
//! [`tree`] module rebuilds nested trees from delimited path fields.

pub mod error;
pub mod pipeline;
pub mod schema;
pub mod traits;
pub mod tree;
pub mod types;
pub mod value;

// Re-export commonly used items
pub use error::{Result, StoreError};
pub use schema::{ConvertMode, RecordShape, SchemaDescriptor};
pub use traits::{reject_grouping, Mutator, PageFetcher};
pub use tree::{TreeBuilder, TreeNode, LEAF_ID_KEY};
pub use types::{
    Filter, FilterValue, GroupBy, Page, QuerySpec, Record, RecordId, Reduce, Simplify,
    SimplifyRule, Sort, SortDirection,
};
