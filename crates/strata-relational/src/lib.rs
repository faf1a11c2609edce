//! Relational adapter.
//!
//! Executes the shared query contract against a SQL database through
//! sea-orm, generic over any [`EntityTrait`]. Filters, sorts, projections
//! and pagination are pushed down into generated SQL rather than applied
//! in memory:
//!
//! - scalar string filters become `LIKE 'value%'` (prefix match), other
//!   scalars become equality, membership becomes `IN (..)`
//! - related filters join through a caller-supplied [`RelationMap`] and
//!   constrain columns of the joined table
//! - string-typed sort columns are ordered through `LOWER(..)` so the
//!   ordering contract is case-insensitive here too
//! - the page total comes from a windowless `COUNT` over the same
//!   filtered statement
//!
//! Aggregation (group/simplify/weight) is not pushed down; those specs are
//! rejected up front.

use std::marker::PhantomData;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, Func, IntoColumnRef, SimpleExpr};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, ColumnType, Condition, DatabaseConnection,
    EntityTrait, IdenStatic, IntoActiveModel, IntoSimpleExpr, Iterable, JoinType, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationDef, Select, TryIntoModel,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use strata_query::{
    reject_grouping, ConvertMode, Filter, FilterValue, Mutator, Page, PageFetcher, QuerySpec,
    Record, RecordId, Result, SchemaDescriptor, SortDirection, StoreError,
};
use tracing::{debug, error};

struct Relation {
    table: String,
    def: Box<dyn Fn() -> RelationDef + Send + Sync>,
}

/// Joins available to filters and sorts, keyed by the filter field that
/// triggers them.
///
/// A related filter like `{"company": {"name": "acme"}}` needs to know
/// which sea-orm relation to join and which table the joined columns live
/// in; entities cannot express that by name alone, so the caller registers
/// each reachable relation once.
#[derive(Default)]
pub struct RelationMap {
    relations: HashMap<String, Relation>,
}

impl RelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `field` as a join through `def` into `table`
    pub fn with(
        mut self,
        field: impl Into<String>,
        table: impl Into<String>,
        def: impl Fn() -> RelationDef + Send + Sync + 'static,
    ) -> Self {
        self.relations.insert(
            field.into(),
            Relation {
                table: table.into(),
                def: Box::new(def),
            },
        );
        self
    }

    fn get(&self, field: &str) -> Result<&Relation> {
        self.relations.get(field).ok_or_else(|| {
            StoreError::schema_mismatch(format!("no relation registered for '{}'", field))
        })
    }
}

fn to_db_value(value: &Value) -> sea_orm::Value {
    match value {
        Value::Null => sea_orm::Value::Int(None),
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        Value::String(s) => s.clone().into(),
        other => sea_orm::Value::Json(Some(Box::new(other.clone()))),
    }
}

fn is_string_column(ty: &ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::String(_) | ColumnType::Char(_) | ColumnType::Text
    )
}

/// Generic sea-orm backed adapter over one entity
pub struct RelationalAdapter<E: EntityTrait> {
    db: DatabaseConnection,
    descriptor: SchemaDescriptor,
    relations: RelationMap,
    entity: PhantomData<fn() -> E>,
}

impl<E: EntityTrait> RelationalAdapter<E> {
    pub fn new(db: DatabaseConnection, descriptor: SchemaDescriptor) -> Self {
        Self {
            db,
            descriptor,
            relations: RelationMap::new(),
            entity: PhantomData,
        }
    }

    pub fn with_relations(mut self, relations: RelationMap) -> Self {
        self.relations = relations;
        self
    }

    fn column(&self, name: &str) -> Result<E::Column> {
        E::Column::iter()
            .find(|c| c.as_str() == name)
            .ok_or_else(|| StoreError::schema_mismatch(format!("unknown column '{}'", name)))
    }

    fn column_clause(&self, column: E::Column, clause: &FilterValue) -> Result<SimpleExpr> {
        Ok(match clause {
            FilterValue::Value(Value::Null) => column.is_null(),
            FilterValue::Value(Value::String(s)) => column.starts_with(s),
            FilterValue::Value(value) => column.eq(to_db_value(value)),
            FilterValue::OneOf(options) => column.is_in(options.iter().map(to_db_value)),
            FilterValue::Related(_) => {
                return Err(StoreError::invalid_operation(
                    "related clause reached column translation",
                ))
            }
        })
    }

    /// Clauses against a joined table go through raw table/column refs
    /// since the joined entity's typed columns are not known here
    fn related_clause(
        &self,
        relation: &Relation,
        sub: &BTreeMap<String, FilterValue>,
    ) -> Result<Condition> {
        let mut condition = Condition::all();
        for (field, clause) in sub {
            let column = Expr::col((Alias::new(&relation.table), Alias::new(field.as_str())));
            let expr = match clause {
                FilterValue::Value(Value::Null) => column.is_null(),
                FilterValue::Value(Value::String(s)) => column.like(format!("{}%", s)),
                FilterValue::Value(value) => column.eq(to_db_value(value)),
                FilterValue::OneOf(options) => column.is_in(options.iter().map(to_db_value)),
                FilterValue::Related(_) => {
                    return Err(StoreError::unsupported(
                        "related filters only reach one relation deep",
                    ))
                }
            };
            condition = condition.add(expr);
        }
        Ok(condition)
    }

    fn join_once(
        &self,
        select: Select<E>,
        joined: &mut HashSet<String>,
        field: &str,
    ) -> Result<Select<E>> {
        let relation = self.relations.get(field)?;
        if joined.insert(field.to_string()) {
            Ok(select.join(JoinType::InnerJoin, (relation.def)()))
        } else {
            Ok(select)
        }
    }

    /// Filtered, joined statement shared by page, first, one and count
    fn base_select(&self, filter: Option<&Filter>) -> Result<Select<E>> {
        let mut select = E::find();
        let mut joined = HashSet::new();
        let filter = match filter {
            Some(f) => f,
            None => return Ok(select),
        };
        let mut condition = Condition::all();
        for (field, clause) in filter {
            match clause {
                FilterValue::Related(sub) => {
                    select = self.join_once(select, &mut joined, field)?;
                    condition = condition.add(self.related_clause(self.relations.get(field)?, sub)?);
                }
                other => {
                    condition = condition.add(self.column_clause(self.column(field)?, other)?);
                }
            }
        }
        Ok(select.filter(condition))
    }

    fn apply_sort(&self, mut select: Select<E>, spec: &QuerySpec) -> Result<Select<E>> {
        let sort = match &spec.sort {
            Some(s) => s,
            None => return Ok(select),
        };
        let order = match sort.direction {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        };
        if let Some((relation_field, column)) = sort.field.split_once('.') {
            let mut joined = HashSet::new();
            select = self.join_once(select, &mut joined, relation_field)?;
            let relation = self.relations.get(relation_field)?;
            let expr = SimpleExpr::Column(
                (Alias::new(&relation.table), Alias::new(column)).into_column_ref(),
            );
            return Ok(select.order_by(expr, order));
        }
        let column = self.column(&sort.field)?;
        let expr = if is_string_column(column.def().get_column_type()) {
            SimpleExpr::from(Func::lower(column.into_simple_expr()))
        } else {
            column.into_simple_expr()
        };
        Ok(select.order_by(expr, order))
    }

    fn apply_projection(&self, select: Select<E>, fields: &[String]) -> Result<Select<E>> {
        self.descriptor.check_fields(fields)?;
        let mut select = select.select_only();
        for field in fields {
            select = select.column(self.column(field)?);
        }
        Ok(select)
    }

    /// The full read statement for a page spec, minus the count
    fn page_select(&self, spec: &QuerySpec) -> Result<Select<E>> {
        let mut select = self.apply_sort(self.base_select(spec.filter.as_ref())?, spec)?;
        if let Some(fields) = &spec.fields {
            select = self.apply_projection(select, fields)?;
        }
        select = select.offset(spec.offset as u64);
        if spec.limit >= 0 {
            select = select.limit(spec.limit as u64);
        }
        Ok(select)
    }

    fn id_select(&self, id: &RecordId) -> Result<Select<E>> {
        let column = self.column(&self.descriptor.id_field)?;
        Ok(E::find().filter(column.eq(to_db_value(&id.to_value()))))
    }

    fn row_to_record(&self, row: Value) -> Result<Record> {
        match row {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::backend(format!(
                "expected a row object, got {}",
                other
            ))),
        }
    }

    fn backend_err(&self, op: &str, e: sea_orm::DbErr) -> StoreError {
        error!("relational {} failed: {}", op, e);
        StoreError::backend(format!("relational {} failed: {}", op, e))
    }
}

#[async_trait]
impl<E: EntityTrait> PageFetcher for RelationalAdapter<E> {
    fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    async fn fetch_one(&self, id: &RecordId, convert: &ConvertMode) -> Result<Record> {
        let row = self
            .id_select(id)?
            .into_json()
            .one(&self.db)
            .await
            .map_err(|e| self.backend_err("fetch_one", e))?
            .ok_or_else(|| StoreError::not_found(format!("identifier '{}'", id)))?;
        Ok(self.descriptor.convert(&self.row_to_record(row)?, convert))
    }

    async fn fetch_first(
        &self,
        filter: &Filter,
        fields: Option<&[String]>,
        convert: &ConvertMode,
    ) -> Result<Record> {
        let mut select = self.base_select(Some(filter))?;
        if let Some(fields) = fields {
            select = self.apply_projection(select, fields)?;
        }
        let row = select
            .into_json()
            .one(&self.db)
            .await
            .map_err(|e| self.backend_err("fetch_first", e))?
            .ok_or_else(|| StoreError::not_found("no row matches the filter"))?;
        Ok(self.descriptor.convert(&self.row_to_record(row)?, convert))
    }

    async fn fetch_page(&self, spec: &QuerySpec) -> Result<Page> {
        reject_grouping(spec, "relational")?;

        // Count before the window so total_count covers the whole filter.
        let total_count = self
            .base_select(spec.filter.as_ref())?
            .into_json()
            .count(&self.db)
            .await
            .map_err(|e| self.backend_err("count", e))?;

        let rows = self
            .page_select(spec)?
            .into_json()
            .all(&self.db)
            .await
            .map_err(|e| self.backend_err("fetch_page", e))?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(
                self.descriptor
                    .convert(&self.row_to_record(row)?, &spec.convert),
            );
        }

        debug!(total = total_count, returned = records.len(), "relational fetch_page");
        Ok(Page {
            records,
            total_count,
        })
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<u64> {
        self.base_select(filter)?
            .into_json()
            .count(&self.db)
            .await
            .map_err(|e| self.backend_err("count", e))
    }
}

#[async_trait]
impl<E> Mutator for RelationalAdapter<E>
where
    E: EntityTrait,
    E::Model: Serialize + IntoActiveModel<E::ActiveModel> + Sync,
    for<'de> E::Model: serde::Deserialize<'de>,
    E::ActiveModel: ActiveModelBehavior + TryIntoModel<E::Model> + Default + Send,
{
    /// Identifier assignment stays with the database; duplicate keys come
    /// back as a backend error from the unique constraint
    async fn create(&self, input: Record) -> Result<Record> {
        let mut model = <E::ActiveModel as Default>::default();
        model
            .set_from_json(Value::Object(input))
            .map_err(|e| StoreError::schema_mismatch(format!("input does not fit the entity: {}", e)))?;
        let inserted = model
            .insert(&self.db)
            .await
            .map_err(|e| self.backend_err("insert", e))?;
        let row = serde_json::to_value(inserted)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(self
            .descriptor
            .convert(&self.row_to_record(row)?, &ConvertMode::Default))
    }

    async fn edit(&self, id: &RecordId, patch: Record) -> Result<Record> {
        let model = self
            .id_select(id)?
            .one(&self.db)
            .await
            .map_err(|e| self.backend_err("edit", e))?
            .ok_or_else(|| StoreError::not_found(format!("identifier '{}'", id)))?;
        let mut active = model.into_active_model();
        // Absent fields stay NotSet, so the update only touches the patch.
        active
            .set_from_json(Value::Object(patch))
            .map_err(|e| StoreError::schema_mismatch(format!("patch does not fit the entity: {}", e)))?;
        let updated = active
            .update(&self.db)
            .await
            .map_err(|e| self.backend_err("update", e))?;
        let row = serde_json::to_value(updated)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(self
            .descriptor
            .convert(&self.row_to_record(row)?, &ConvertMode::Default))
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        let column = self.column(&self.descriptor.id_field)?;
        let outcome = E::delete_many()
            .filter(column.eq(to_db_value(&id.to_value())))
            .exec(&self.db)
            .await
            .map_err(|e| self.backend_err("delete", e))?;
        if outcome.rows_affected == 0 {
            return Err(StoreError::not_found(format!("identifier '{}'", id)));
        }
        Ok(())
    }
}
