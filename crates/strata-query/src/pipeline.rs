//! Group-by reduction, column unstacking, sparse-category simplification,
//! sorting and windowing over in-memory row sets.
//!
//! These are pure functions over `Vec<Record>`; the tabular adapter composes
//! them into its `fetch_page` pipeline. Every grouped row carries a support
//! count (how many source rows produced it) so simplification can enforce
//! its minimum-support threshold.

use crate::error::{Result, StoreError};
use crate::types::{GroupBy, Record, Reduce, Simplify, Sort, SortDirection};
use crate::value::{as_f64, compare_values, number_value, value_eq};
use serde_json::Value;
use std::collections::HashMap;

/// Grouped rows plus the per-row support counts
#[derive(Debug, Clone)]
pub struct Grouped {
    pub rows: Vec<Record>,
    pub support: Vec<usize>,
}

/// Multiply every projected numeric field by the row's weight value
///
/// The weight field itself is left untouched. Rows without a numeric weight
/// contribute their fields unweighted.
pub fn apply_weight(rows: &mut [Record], fields: &[String], weight_field: &str) {
    for row in rows.iter_mut() {
        let weight = match row.get(weight_field).and_then(as_f64) {
            Some(w) => w,
            None => continue,
        };
        for field in fields {
            if field == weight_field {
                continue;
            }
            if let Some(v) = row.get(field).and_then(as_f64) {
                row.insert(field.clone(), number_value(v * weight));
            }
        }
    }
}

fn reduce_values(values: &[f64], row_count: usize, reduce: Reduce) -> Value {
    match reduce {
        Reduce::Count => Value::from(row_count as i64),
        Reduce::Sum => number_value(values.iter().sum()),
        Reduce::Min => values
            .iter()
            .cloned()
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.min(v))))
            .map(number_value)
            .unwrap_or(Value::Null),
        Reduce::Max => values
            .iter()
            .cloned()
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
            .map(number_value)
            .unwrap_or(Value::Null),
        Reduce::Mean => {
            if values.is_empty() {
                Value::Null
            } else {
                number_value(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
    }
}

/// Combine already-reduced values from merged groups into one value
///
/// Sum and count add up; min/max fold; mean is recomputed as a
/// support-weighted mean so the merged row equals a reduction over the
/// original underlying rows.
fn merge_reduced(values: &[f64], supports: &[usize], reduce: Reduce) -> Value {
    match reduce {
        Reduce::Sum | Reduce::Count => number_value(values.iter().sum()),
        Reduce::Min => reduce_values(values, values.len(), Reduce::Min),
        Reduce::Max => reduce_values(values, values.len(), Reduce::Max),
        Reduce::Mean => {
            let total: usize = supports.iter().sum();
            if total == 0 {
                Value::Null
            } else {
                let weighted: f64 = values
                    .iter()
                    .zip(supports)
                    .map(|(v, s)| v * *s as f64)
                    .sum();
                number_value(weighted / total as f64)
            }
        }
    }
}

fn value_fields_of(rows: &[Record], group_fields: &[String], projected: Option<&[String]>) -> Vec<String> {
    if let Some(projected) = projected {
        return projected
            .iter()
            .filter(|f| !group_fields.contains(f))
            .cloned()
            .collect();
    }
    // First-seen order across all rows, numeric somewhere, not a group key.
    let mut seen = Vec::new();
    for row in rows {
        for (field, value) in row {
            if group_fields.contains(field) || seen.contains(field) {
                continue;
            }
            if as_f64(value).is_some() {
                seen.push(field.clone());
            }
        }
    }
    seen
}

fn group_key(row: &Record, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
        .collect()
}

fn key_repr(key: &[Value]) -> String {
    key.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Group rows by the declared key fields and reduce the value fields
///
/// `projected` restricts the value fields when the caller asked for a field
/// projection. Group order follows first appearance in the input.
pub fn group_reduce(
    rows: &[Record],
    group: &GroupBy,
    projected: Option<&[String]>,
) -> Result<Grouped> {
    if group.fields.is_empty() {
        return Err(StoreError::invalid_operation(
            "group_by requires at least one key field",
        ));
    }

    let value_fields = value_fields_of(rows, &group.fields, projected);

    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut buckets: HashMap<String, Vec<&Record>> = HashMap::new();
    for row in rows {
        let key = group_key(row, &group.fields);
        let repr = key_repr(&key);
        if !buckets.contains_key(&repr) {
            order.push(key);
        }
        buckets.entry(repr).or_default().push(row);
    }

    let mut out_rows = Vec::with_capacity(order.len());
    let mut support = Vec::with_capacity(order.len());
    for key in &order {
        let members = &buckets[&key_repr(key)];
        let mut out = Record::new();
        for (field, value) in group.fields.iter().zip(key) {
            out.insert(field.clone(), value.clone());
        }
        if value_fields.is_empty() {
            // Nothing left to reduce; a count is always well-defined.
            out.insert("count".to_string(), Value::from(members.len() as i64));
        } else {
            for field in &value_fields {
                let values: Vec<f64> = members
                    .iter()
                    .filter_map(|r| r.get(field).and_then(as_f64))
                    .collect();
                out.insert(field.clone(), reduce_values(&values, members.len(), group.reduce));
            }
        }
        out_rows.push(out);
        support.push(members.len());
    }

    let grouped = Grouped {
        rows: out_rows,
        support,
    };

    if group.unstack {
        unstack(grouped, group, &value_fields)
    } else {
        Ok(grouped)
    }
}

/// Promote the second grouping level to columns
fn unstack(grouped: Grouped, group: &GroupBy, value_fields: &[String]) -> Result<Grouped> {
    if group.fields.len() != 2 {
        return Err(StoreError::invalid_operation(
            "unstack requires exactly two group-by fields",
        ));
    }
    let value_field = match value_fields {
        [] => "count",
        [single] => single.as_str(),
        _ => {
            return Err(StoreError::invalid_operation(
                "unstack requires a single value field",
            ))
        }
    };
    let (first, second) = (&group.fields[0], &group.fields[1]);

    let mut order: Vec<Value> = Vec::new();
    let mut columns: Vec<String> = Vec::new();
    let mut cells: HashMap<String, (Record, usize)> = HashMap::new();

    for (row, support) in grouped.rows.iter().zip(&grouped.support) {
        let key = row.get(first).cloned().unwrap_or(Value::Null);
        let repr = key_repr(std::slice::from_ref(&key));
        let column = match row.get(second) {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => "null".to_string(),
        };
        if !columns.contains(&column) {
            columns.push(column.clone());
        }
        let entry = cells.entry(repr).or_insert_with(|| {
            order.push(key.clone());
            let mut base = Record::new();
            base.insert(first.clone(), key);
            (base, 0)
        });
        entry
            .0
            .insert(column, row.get(value_field).cloned().unwrap_or(Value::Null));
        entry.1 += support;
    }

    let mut rows = Vec::with_capacity(order.len());
    let mut support = Vec::with_capacity(order.len());
    for key in order {
        let Some((mut row, sup)) = cells.remove(&key_repr(std::slice::from_ref(&key))) else {
            continue;
        };
        // Every output row carries every promoted column.
        for column in &columns {
            if !row.contains_key(column) {
                row.insert(column.clone(), Value::Null);
            }
        }
        rows.push(row);
        support.push(sup);
    }

    Ok(Grouped { rows, support })
}

/// Apply the simplify rules to grouped rows
///
/// For each rule, rows whose key for `rule.field` is among the source values
/// are merged into one row labeled `merged_label` using the grouping
/// reduction. The merged row is kept only when its combined support meets
/// `minimum_rows_allowed`; otherwise the constituent rows are dropped with
/// no replacement.
pub fn simplify_rows(mut grouped: Grouped, simplify: &Simplify, reduce: Reduce) -> Grouped {
    for rule in &simplify.rules {
        let mut sources: Vec<usize> = Vec::new();
        for (i, row) in grouped.rows.iter().enumerate() {
            let key = row.get(&rule.field).cloned().unwrap_or(Value::Null);
            if rule.source_values.iter().any(|v| value_eq(v, &key)) {
                sources.push(i);
            }
        }
        if sources.is_empty() {
            continue;
        }

        let combined_support: usize = sources.iter().map(|&i| grouped.support[i]).sum();
        let replacement = if combined_support >= simplify.minimum_rows_allowed {
            Some(merge_rows(&grouped, &sources, rule, reduce, combined_support))
        } else {
            None
        };

        let first = sources[0];
        let keep: Vec<bool> = (0..grouped.rows.len())
            .map(|i| !sources.contains(&i))
            .collect();
        let mut rows = Vec::with_capacity(grouped.rows.len());
        let mut support = Vec::with_capacity(grouped.rows.len());
        for (i, (row, sup)) in grouped
            .rows
            .into_iter()
            .zip(grouped.support.into_iter())
            .enumerate()
        {
            if i == first {
                if let Some((merged, merged_support)) = replacement.clone() {
                    rows.push(merged);
                    support.push(merged_support);
                }
            }
            if keep[i] {
                rows.push(row);
                support.push(sup);
            }
        }
        grouped = Grouped { rows, support };
    }
    grouped
}

fn merge_rows(
    grouped: &Grouped,
    sources: &[usize],
    rule: &crate::types::SimplifyRule,
    reduce: Reduce,
    combined_support: usize,
) -> (Record, usize) {
    let members: Vec<&Record> = sources.iter().map(|&i| &grouped.rows[i]).collect();
    let supports: Vec<usize> = sources.iter().map(|&i| grouped.support[i]).collect();

    let mut merged = Record::new();
    for (field, value) in members[0].iter() {
        if field == &rule.field {
            merged.insert(field.clone(), Value::from(rule.merged_label.clone()));
            continue;
        }
        let numeric: Vec<f64> = members.iter().filter_map(|r| r.get(field).and_then(as_f64)).collect();
        if numeric.len() == members.len() {
            merged.insert(field.clone(), merge_reduced(&numeric, &supports, reduce));
        } else if members.iter().all(|r| r.get(field) == Some(value)) {
            merged.insert(field.clone(), value.clone());
        } else {
            merged.insert(field.clone(), Value::Null);
        }
    }
    (merged, combined_support)
}

/// Stable sort, case-insensitive on text; missing fields sort first
pub fn sort_rows(rows: &mut [Record], sort: &Sort) {
    rows.sort_by(|a, b| {
        let left = a.get(&sort.field).unwrap_or(&Value::Null);
        let right = b.get(&sort.field).unwrap_or(&Value::Null);
        let ordering = compare_values(left, right);
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// Apply the offset/limit window, clamped to the available rows
///
/// A negative limit means unbounded.
pub fn window(rows: Vec<Record>, offset: usize, limit: i64) -> Vec<Record> {
    if offset >= rows.len() {
        return Vec::new();
    }
    let end = if limit < 0 {
        rows.len()
    } else {
        rows.len().min(offset + limit as usize)
    };
    rows[offset..end].to_vec()
}

/// Allow-list projection; the source rows are never mutated
pub fn project(rows: &[Record], fields: &[String]) -> Vec<Record> {
    rows.iter()
        .map(|row| {
            let mut out = Record::new();
            for field in fields {
                if let Some(value) = row.get(field) {
                    out.insert(field.clone(), value.clone());
                }
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SimplifyRule;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Record {
        let mut r = Record::new();
        for (k, v) in pairs {
            r.insert((*k).to_string(), v.clone());
        }
        r
    }

    fn fixture() -> Vec<Record> {
        vec![
            row(&[("cat", json!("A")), ("amount", json!(10))]),
            row(&[("cat", json!("A")), ("amount", json!(20))]),
            row(&[("cat", json!("B")), ("amount", json!(5))]),
            row(&[("cat", json!("C")), ("amount", json!(1))]),
            row(&[("cat", json!("C")), ("amount", json!(2))]),
            row(&[("cat", json!("C")), ("amount", json!(3))]),
        ]
    }

    #[test]
    fn group_sum_by_category() {
        let grouped = group_reduce(
            &fixture(),
            &GroupBy::new(["cat"], Reduce::Sum),
            None,
        )
        .unwrap();
        assert_eq!(grouped.rows.len(), 3);
        assert_eq!(grouped.rows[0].get("amount"), Some(&json!(30)));
        assert_eq!(grouped.rows[1].get("amount"), Some(&json!(5)));
        assert_eq!(grouped.rows[2].get("amount"), Some(&json!(6)));
        assert_eq!(grouped.support, vec![2, 1, 3]);
    }

    #[test]
    fn group_mean_and_count() {
        let mean = group_reduce(&fixture(), &GroupBy::new(["cat"], Reduce::Mean), None).unwrap();
        assert_eq!(mean.rows[0].get("amount"), Some(&json!(15)));
        assert_eq!(mean.rows[2].get("amount"), Some(&json!(2)));

        let count = group_reduce(&fixture(), &GroupBy::new(["cat"], Reduce::Count), None).unwrap();
        assert_eq!(count.rows[0].get("amount"), Some(&json!(2)));
        assert_eq!(count.rows[2].get("amount"), Some(&json!(3)));
    }

    #[test]
    fn group_without_numeric_fields_counts_rows() {
        let rows = vec![
            row(&[("cat", json!("A")), ("label", json!("x"))]),
            row(&[("cat", json!("A")), ("label", json!("y"))]),
        ];
        let grouped = group_reduce(&rows, &GroupBy::new(["cat"], Reduce::Count), None).unwrap();
        assert_eq!(grouped.rows[0].get("count"), Some(&json!(2)));
    }

    #[test]
    fn unstack_promotes_second_level_to_columns() {
        let rows = vec![
            row(&[("year", json!(2024)), ("cat", json!("A")), ("amount", json!(1))]),
            row(&[("year", json!(2024)), ("cat", json!("B")), ("amount", json!(2))]),
            row(&[("year", json!(2025)), ("cat", json!("A")), ("amount", json!(3))]),
        ];
        let grouped = group_reduce(
            &rows,
            &GroupBy::new(["year", "cat"], Reduce::Sum).unstacked(),
            None,
        )
        .unwrap();
        assert_eq!(grouped.rows.len(), 2);
        assert_eq!(grouped.rows[0].get("year"), Some(&json!(2024)));
        assert_eq!(grouped.rows[0].get("A"), Some(&json!(1)));
        assert_eq!(grouped.rows[0].get("B"), Some(&json!(2)));
        assert_eq!(grouped.rows[1].get("A"), Some(&json!(3)));
        assert_eq!(grouped.rows[1].get("B"), Some(&json!(null)));
        assert_eq!(grouped.support, vec![2, 1]);
    }

    #[test]
    fn unstack_requires_two_group_fields() {
        let err = group_reduce(
            &fixture(),
            &GroupBy::new(["cat"], Reduce::Sum).unstacked(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }

    #[test]
    fn simplify_merges_when_support_meets_threshold() {
        let grouped = group_reduce(&fixture(), &GroupBy::new(["cat"], Reduce::Sum), None).unwrap();
        let simplified = simplify_rows(
            grouped,
            &Simplify {
                rules: vec![SimplifyRule {
                    field: "cat".into(),
                    source_values: vec![json!("A"), json!("B")],
                    merged_label: "other".into(),
                }],
                minimum_rows_allowed: 3,
            },
            Reduce::Sum,
        );
        assert_eq!(simplified.rows.len(), 2);
        assert_eq!(simplified.rows[0].get("cat"), Some(&json!("other")));
        assert_eq!(simplified.rows[0].get("amount"), Some(&json!(35)));
        assert_eq!(simplified.support[0], 3);
        assert_eq!(simplified.rows[1].get("cat"), Some(&json!("C")));
    }

    #[test]
    fn simplify_drops_under_supported_merges() {
        // A has 2 rows, B has 1, C has 10; merging A+B (3 rows) is below
        // the 5-row minimum, so the output has no "other" row and no A/B.
        let mut rows = fixture();
        rows.truncate(3); // A(2), B(1)
        for i in 0..10 {
            rows.push(row(&[("cat", json!("C")), ("amount", json!(i))]));
        }
        let grouped = group_reduce(&rows, &GroupBy::new(["cat"], Reduce::Sum), None).unwrap();
        let simplified = simplify_rows(
            grouped,
            &Simplify {
                rules: vec![SimplifyRule {
                    field: "cat".into(),
                    source_values: vec![json!("A"), json!("B")],
                    merged_label: "other".into(),
                }],
                minimum_rows_allowed: 5,
            },
            Reduce::Sum,
        );
        let cats: Vec<_> = simplified
            .rows
            .iter()
            .map(|r| r.get("cat").cloned().unwrap())
            .collect();
        assert_eq!(cats, vec![json!("C")]);
    }

    #[test]
    fn simplify_mean_is_support_weighted() {
        let grouped = group_reduce(&fixture(), &GroupBy::new(["cat"], Reduce::Mean), None).unwrap();
        let simplified = simplify_rows(
            grouped,
            &Simplify {
                rules: vec![SimplifyRule {
                    field: "cat".into(),
                    source_values: vec![json!("A"), json!("B")],
                    merged_label: "other".into(),
                }],
                minimum_rows_allowed: 1,
            },
            Reduce::Mean,
        );
        // (10 + 20 + 5) / 3
        assert_eq!(simplified.rows[0].get("amount"), Some(&json!(35.0 / 3.0)));
    }

    #[test]
    fn weight_multiplies_projected_numeric_fields() {
        let mut rows = vec![
            row(&[("amount", json!(3)), ("weight", json!(2.5))]),
            row(&[("amount", json!(4)), ("weight", json!(2))]),
        ];
        apply_weight(&mut rows, &["amount".to_string()], "weight");
        assert_eq!(rows[0].get("amount"), Some(&json!(7.5)));
        assert_eq!(rows[1].get("amount"), Some(&json!(8)));
    }

    #[test]
    fn window_clamps_and_honors_negative_limit() {
        let rows: Vec<Record> = (0..5)
            .map(|i| row(&[("n", json!(i))]))
            .collect();
        assert_eq!(window(rows.clone(), 3, 10).len(), 2);
        assert_eq!(window(rows.clone(), 0, -1).len(), 5);
        assert_eq!(window(rows.clone(), 9, 2).len(), 0);
        let sliced = window(rows, 1, 2);
        assert_eq!(sliced[0].get("n"), Some(&json!(1)));
        assert_eq!(sliced.len(), 2);
    }

    #[test]
    fn sort_rows_descending() {
        let mut rows = vec![
            row(&[("name", json!("banana"))]),
            row(&[("name", json!("Apple"))]),
            row(&[("name", json!("cherry"))]),
        ];
        sort_rows(&mut rows, &Sort::desc("name"));
        let names: Vec<_> = rows.iter().map(|r| r.get("name").cloned().unwrap()).collect();
        assert_eq!(names, vec![json!("cherry"), json!("banana"), json!("Apple")]);
    }
}
