//! Shared helpers for turning a [`Filter`] or [`InsertRecord`] into
//! parameterised SQL fragments. Both driver crates use these so the "WHERE
//! field = value" / "INSERT INTO table (...) VALUES (...)" shape stays
//! identical across engines; only the placeholder style (`?` vs `$N`)
//! differs, which is why the emitted placeholder is a caller-supplied
//! closure rather than baked in here.

use serde_json::Value;

use crate::driver::{Filter, FilterOperator, InsertRecord};

/// Renders `filter` as a `WHERE ...` clause body (without the `WHERE`
/// keyword) plus its bind values, in declaration order. Nested filters are
/// combined with their parent leaf, if any, using `AND` — nested filters
/// don't distinguish AND/OR composition, so conjunction is the conservative
/// reading (see DESIGN.md).
///
/// `placeholder(n)` receives the 1-based ordinal of the bind value about to
/// be emitted and returns the engine's placeholder syntax for it (e.g. `"?"`
/// for rqlite, `format!("${n}")` for postgres).
pub fn compile_where(
    filter: &Filter,
    placeholder: &mut dyn FnMut(usize) -> String,
) -> (String, Vec<Value>) {
    let mut values = Vec::new();
    let clause = compile_node(filter, placeholder, &mut values);
    (clause, values)
}

fn compile_node(
    filter: &Filter,
    placeholder: &mut dyn FnMut(usize) -> String,
    values: &mut Vec<Value>,
) -> String {
    let mut clauses = Vec::new();

    if let (Some(field), Some(op)) = (&filter.field, &filter.operator) {
        clauses.push(compile_leaf(field, *op, filter.value.clone(), placeholder, values));
    }

    for nested in &filter.nested {
        let nested_clause = compile_node(nested, placeholder, values);
        if !nested_clause.is_empty() {
            clauses.push(format!("({nested_clause})"));
        }
    }

    clauses.join(" AND ")
}

fn compile_leaf(
    field: &str,
    op: FilterOperator,
    value: Option<Value>,
    placeholder: &mut dyn FnMut(usize) -> String,
    values: &mut Vec<Value>,
) -> String {
    match op {
        FilterOperator::IsNull => format!("{field} IS NULL"),
        FilterOperator::IsNotNull => format!("{field} IS NOT NULL"),
        FilterOperator::In | FilterOperator::NotIn => {
            let items = value.and_then(|v| v.as_array().cloned()).unwrap_or_default();
            let mut marks = Vec::with_capacity(items.len());
            for item in items {
                values.push(item);
                marks.push(placeholder(values.len()));
            }
            let keyword = if op == FilterOperator::In { "IN" } else { "NOT IN" };
            format!("{field} {keyword} ({})", marks.join(", "))
        }
        _ => {
            let sql_op = match op {
                FilterOperator::Eq => "=",
                FilterOperator::Ne => "!=",
                FilterOperator::Gt => ">",
                FilterOperator::Gte => ">=",
                FilterOperator::Lt => "<",
                FilterOperator::Lte => "<=",
                FilterOperator::Like => "LIKE",
                _ => unreachable!("handled above"),
            };
            values.push(value.unwrap_or(Value::Null));
            let mark = placeholder(values.len());
            format!("{field} {sql_op} {mark}")
        }
    }
}

/// Renders the `ORDER BY` / `GROUP BY` / `LIMIT` / `OFFSET` tail for a
/// filter, in that fixed order, omitting clauses the filter leaves unset.
pub fn compile_tail(filter: &Filter) -> String {
    let mut parts = Vec::new();
    if !filter.group_by.is_empty() {
        parts.push(format!("GROUP BY {}", filter.group_by.join(", ")));
    }
    if !filter.order_by.is_empty() {
        parts.push(format!("ORDER BY {}", filter.order_by.join(", ")));
    }
    if let Some(limit) = filter.limit {
        parts.push(format!("LIMIT {limit}"));
    }
    if let Some(offset) = filter.offset {
        parts.push(format!("OFFSET {offset}"));
    }
    parts.join(" ")
}

/// Renders `INSERT INTO table (...) VALUES (...)` for one record.
pub fn compile_insert(
    record: &InsertRecord,
    placeholder: &mut dyn FnMut(usize) -> String,
) -> (String, Vec<Value>) {
    let mut columns: Vec<&String> = record.data.keys().collect();
    columns.sort();
    let mut values = Vec::with_capacity(columns.len());
    let mut marks = Vec::with_capacity(columns.len());
    for column in &columns {
        values.push(record.data[*column].clone());
        marks.push(placeholder(values.len()));
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        record.table_name,
        columns
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        marks.join(", ")
    );
    (sql, values)
}
