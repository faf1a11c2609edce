use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A record as an ordered mapping of field name to value
pub type Record = serde_json::Map<String, Value>;

/// Identifier of a record within a logical collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Integer key (tabular, relational, embedded stores)
    Int(i64),
    /// Opaque string token (document stores)
    Text(String),
}

impl RecordId {
    /// Build an identifier from a raw field value, if the value is key-shaped
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    /// The identifier as a raw field value
    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(n) => Value::from(*n),
            RecordId::Text(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Int(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Text(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Text(s)
    }
}

/// One filter clause, keyed by field name in a [`Filter`]
///
/// A scalar means equality (prefix match for strings on the tabular and
/// relational adapters), a list means membership, and a nested map means a
/// join filter against a related collection (relational adapter only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Membership: the field value must be one of these
    OneOf(Vec<Value>),
    /// Join filter against a related collection
    Related(BTreeMap<String, FilterValue>),
    /// Equality (prefix match for strings on relational/tabular backends)
    Value(Value),
}

impl FilterValue {
    pub fn eq(value: impl Into<Value>) -> Self {
        FilterValue::Value(value.into())
    }

    pub fn one_of(values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        FilterValue::OneOf(values.into_iter().map(Into::into).collect())
    }
}

/// Mapping of field name to filter clause; clauses are combined with AND
pub type Filter = BTreeMap<String, FilterValue>;

/// Sort direction
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort key and direction; text comparison is case-insensitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Reduction applied to grouped value fields
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduce {
    Sum,
    Count,
    Min,
    Max,
    Mean,
}

/// Group-by specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    /// Grouping key fields, in order
    pub fields: Vec<String>,
    /// Reduction applied to the value fields
    pub reduce: Reduce,
    /// Promote the second grouping level to columns
    pub unstack: bool,
}

impl GroupBy {
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>, reduce: Reduce) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            reduce,
            unstack: false,
        }
    }

    pub fn unstacked(mut self) -> Self {
        self.unstack = true;
        self
    }
}

/// One bucket-merge rule applied after grouping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplifyRule {
    /// Grouping key field the rule targets
    pub field: String,
    /// Key values to merge away
    pub source_values: Vec<Value>,
    /// Label of the merged row
    pub merged_label: String,
}

/// Bucket-merge of sparse grouped categories, subject to a support threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simplify {
    pub rules: Vec<SimplifyRule>,
    /// A merged row is kept only when its combined support reaches this
    pub minimum_rows_allowed: usize,
}

/// The full description of one logical query
///
/// Constructed by the caller (the excluded transport layer parses it from
/// query-string/JSON parameters) and executed unmodified by any adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Field filters, combined with AND
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    /// Sort key and direction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    /// Field projection; must be a subset of the collection's fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    /// Zero-based window start
    #[serde(default)]
    pub offset: usize,
    /// Window size; negative means unbounded
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Group-by + reduction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,
    /// Sparse-category bucket merge, applied after grouping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simplify: Option<Simplify>,
    /// Multiply every projected numeric field by this field's value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_field: Option<String>,
    /// Schema conversion applied to each returned row
    #[serde(skip)]
    pub convert: crate::schema::ConvertMode,
}

fn default_limit() -> i64 {
    -1
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            filter: None,
            sort: None,
            fields: None,
            offset: 0,
            limit: -1,
            group_by: None,
            simplify: None,
            weight_field: None,
            convert: crate::schema::ConvertMode::default(),
        }
    }
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_filter_field(mut self, field: impl Into<String>, value: FilterValue) -> Self {
        self.filter
            .get_or_insert_with(Filter::new)
            .insert(field.into(), value);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_window(mut self, offset: usize, limit: i64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn with_group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = Some(group_by);
        self
    }

    pub fn with_simplify(mut self, simplify: Simplify) -> Self {
        self.simplify = Some(simplify);
        self
    }

    pub fn with_weight_field(mut self, field: impl Into<String>) -> Self {
        self.weight_field = Some(field.into());
        self
    }

    pub fn with_convert(mut self, convert: crate::schema::ConvertMode) -> Self {
        self.convert = convert;
        self
    }
}

/// One page of converted records plus the pre-pagination match count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// The windowed slice, post conversion
    pub records: Vec<Record>,
    /// Row count after filtering/grouping, before windowing
    pub total_count: u64,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            total_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_from_value() {
        assert_eq!(RecordId::from_value(&json!(7)), Some(RecordId::Int(7)));
        assert_eq!(
            RecordId::from_value(&json!("abc")),
            Some(RecordId::Text("abc".into()))
        );
        assert_eq!(RecordId::from_value(&json!([1])), None);
    }

    #[test]
    fn filter_value_deserializes_untagged() {
        let scalar: FilterValue = serde_json::from_value(json!("jo")).unwrap();
        assert_eq!(scalar, FilterValue::Value(json!("jo")));

        let members: FilterValue = serde_json::from_value(json!([1, 2, 3])).unwrap();
        assert_eq!(members, FilterValue::OneOf(vec![json!(1), json!(2), json!(3)]));

        let related: FilterValue = serde_json::from_value(json!({"name": "acme"})).unwrap();
        match related {
            FilterValue::Related(inner) => {
                assert_eq!(inner.get("name"), Some(&FilterValue::Value(json!("acme"))));
            }
            other => panic!("expected related filter, got {:?}", other),
        }
    }

    #[test]
    fn query_spec_builder() {
        let spec = QuerySpec::new()
            .with_filter_field("age", FilterValue::eq(30))
            .with_sort(Sort::asc("name"))
            .with_window(10, 5);

        assert_eq!(spec.offset, 10);
        assert_eq!(spec.limit, 5);
        assert!(spec.filter.as_ref().unwrap().contains_key("age"));
    }

    #[test]
    fn default_limit_is_unbounded() {
        let spec = QuerySpec::new();
        assert!(spec.limit < 0);
    }
}
