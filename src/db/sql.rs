//! T-SQL statement builders and value conversion for the generic repository.
//!
//! Identifiers are never taken from user input: every column name comes
//! from a `'static` [`EntityMeta`], and values always travel as `@Pn`
//! parameters.

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::borrow::Cow;
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, FromSql, Row, ToSql};

use crate::db::{ListQuery, SortKey};
use crate::error::DbError;
use crate::models::{EntityMeta, Field, FieldKind, IdPolicy, Record};

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(Option<i32>),
    BigInt(i64),
    Text(Option<String>),
    Bool(Option<bool>),
    DateTime(Option<NaiveDateTime>),
    Decimal(Option<BigDecimal>),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlParam::Int(v) => ColumnData::I32(*v),
            SqlParam::BigInt(v) => ColumnData::I64(Some(*v)),
            SqlParam::Text(v) => ColumnData::String(v.as_deref().map(Cow::Borrowed)),
            SqlParam::Bool(v) => ColumnData::Bit(*v),
            SqlParam::DateTime(Some(dt)) => dt.to_sql(),
            SqlParam::DateTime(None) => ColumnData::DateTime2(None),
            SqlParam::Decimal(v) => ColumnData::Numeric(v.as_ref().and_then(to_numeric)),
        }
    }
}

fn to_numeric(value: &BigDecimal) -> Option<Numeric> {
    let (digits, scale) = value.with_scale(6).as_bigint_and_exponent();
    let scale = u8::try_from(scale).ok()?;
    Some(Numeric::new_with_scale(digits.to_i128()?, scale))
}

pub fn as_dyn(params: &[SqlParam]) -> Vec<&dyn ToSql> {
    params.iter().map(|p| p as &dyn ToSql).collect()
}

/// Convert a JSON field value to its typed parameter.
pub fn param_for(field: &Field, value: Option<&Value>) -> Result<SqlParam, DbError> {
    let value = value.unwrap_or(&Value::Null);
    let mismatch = || DbError::decode(field.name, format!("unexpected value {}", value));

    Ok(match field.kind {
        FieldKind::Int => SqlParam::Int(match value {
            Value::Null => None,
            v => Some(
                v.as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(mismatch)?,
            ),
        }),
        FieldKind::Text => SqlParam::Text(match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            _ => return Err(mismatch()),
        }),
        FieldKind::Bool => SqlParam::Bool(match value {
            Value::Null => None,
            v => Some(v.as_bool().ok_or_else(mismatch)?),
        }),
        FieldKind::DateTime => SqlParam::DateTime(match value {
            Value::Null => None,
            v => Some(serde_json::from_value(v.clone()).map_err(|_| mismatch())?),
        }),
    })
}

/// Decode one cell into JSON. Temporal types use chrono's serde format.
pub fn cell_to_json(data: &ColumnData<'static>) -> Value {
    let value = match data {
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(|f| Value::from(f as f64)),
        ColumnData::F64(v) => v.map(Value::from),
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| Value::String(g.to_string())),
        ColumnData::Numeric(v) => v.as_ref().map(|n| Value::String(n.to_string())),
        _ => temporal_to_json(data),
    };
    value.unwrap_or(Value::Null)
}

fn temporal_to_json(data: &ColumnData<'static>) -> Option<Value> {
    if let Ok(Some(v)) = NaiveDateTime::from_sql(data) {
        return serde_json::to_value(v).ok();
    }
    if let Ok(Some(v)) = NaiveDate::from_sql(data) {
        return serde_json::to_value(v).ok();
    }
    if let Ok(Some(v)) = NaiveTime::from_sql(data) {
        return serde_json::to_value(v).ok();
    }
    if let Ok(Some(v)) = DateTime::<FixedOffset>::from_sql(data) {
        return serde_json::to_value(v).ok();
    }
    None
}

/// Rows are selected with field-name aliases, so cells map straight to keys.
pub fn record_from_row(row: Row) -> Record {
    row.cells()
        .map(|(column, data)| (column.name().to_string(), cell_to_json(data)))
        .collect()
}

fn quoted(identifier: &str) -> String {
    format!("[{}]", identifier.replace(']', "]]"))
}

fn select_list(meta: &EntityMeta) -> String {
    meta.fields
        .iter()
        .map(|f| format!("{} AS {}", quoted(f.column), quoted(f.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `%term%` with LIKE wildcards escaped, lowercased for a case-insensitive match.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.to_lowercase().chars() {
        match ch {
            '%' | '_' | '[' => {
                escaped.push('[');
                escaped.push(ch);
                escaped.push(']');
            }
            _ => escaped.push(ch),
        }
    }
    escaped.push('%');
    escaped
}

fn where_clause(meta: &EntityMeta, query: &ListQuery, params: &mut Vec<SqlParam>) -> Result<String, DbError> {
    let mut conditions = Vec::new();

    if let Some(term) = query.search.as_deref().filter(|t| !t.is_empty()) {
        params.push(SqlParam::Text(Some(like_pattern(term))));
        let placeholder = format!("@P{}", params.len());
        let alternatives = meta
            .search
            .iter()
            .filter_map(|name| meta.field(name))
            .map(|field| match field.kind {
                FieldKind::Text => format!("LOWER({}) LIKE {}", quoted(field.column), placeholder),
                _ => format!(
                    "CAST({} AS NVARCHAR(50)) LIKE {}",
                    quoted(field.column),
                    placeholder
                ),
            })
            .collect::<Vec<_>>();
        if !alternatives.is_empty() {
            conditions.push(format!("({})", alternatives.join(" OR ")));
        }
    }

    for (name, value) in &query.filters {
        let field = meta
            .field(name)
            .ok_or_else(|| DbError::decode(*name, "unknown filter"))?;
        params.push(param_for(field, Some(value))?);
        conditions.push(format!("{} = @P{}", quoted(field.column), params.len()));
    }

    Ok(if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    })
}

fn order_clause(meta: &EntityMeta, sort: &[SortKey]) -> String {
    let id = meta.id_field();
    let mut keys: Vec<String> = sort
        .iter()
        .filter_map(|key| meta.field(key.field).map(|f| (f, key.descending)))
        .map(|(f, desc)| format!("{} {}", quoted(f.column), if desc { "DESC" } else { "ASC" }))
        .collect();
    if !sort.iter().any(|k| k.field == id.name) {
        keys.push(format!("{} ASC", quoted(id.column)));
    }
    format!(" ORDER BY {}", keys.join(", "))
}

/// Page query and its matching count query (sharing the filter parameters).
pub fn select_page(
    meta: &EntityMeta,
    query: &ListQuery,
) -> Result<(String, String, Vec<SqlParam>), DbError> {
    let mut params = Vec::new();
    let filter = where_clause(meta, query, &mut params)?;
    let count_sql = format!("SELECT COUNT(*) AS total FROM {}{}", quoted(meta.table), filter);

    let mut sql = format!(
        "SELECT {} FROM {}{}{}",
        select_list(meta),
        quoted(meta.table),
        filter,
        order_clause(meta, &query.sort)
    );
    if let Some(limit) = query.limit {
        sql.push_str(&format!(
            " OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            query.offset, limit
        ));
    }
    Ok((sql, count_sql, params))
}

pub fn select_one(meta: &EntityMeta) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = @P1",
        select_list(meta),
        quoted(meta.table),
        quoted(meta.id_field().column)
    )
}

pub fn count_all(meta: &EntityMeta) -> String {
    format!("SELECT COUNT(*) AS total FROM {}", quoted(meta.table))
}

/// Insert statement whose last result set is a single `id` column.
///
/// `NextMax` tables compute `MAX(id) + 1` and insert inside one transaction
/// holding an update/range lock, so concurrent creations serialize instead
/// of colliding on the same identifier.
pub fn insert(meta: &EntityMeta, record: &Record) -> Result<(String, Vec<SqlParam>), DbError> {
    let id = meta.id_field();
    let table = quoted(meta.table);
    let data_fields: Vec<&Field> = meta.fields.iter().skip(1).collect();

    let mut params = Vec::with_capacity(meta.fields.len());
    let id_param = param_for(id, record.get(id.name))?;

    let sql = match meta.id_policy {
        IdPolicy::NextMax => {
            params.push(id_param);
            for field in &data_fields {
                params.push(param_for(field, record.get(field.name))?);
            }
            let columns = std::iter::once(id)
                .chain(data_fields.iter().copied())
                .map(|f| quoted(f.column))
                .collect::<Vec<_>>()
                .join(", ");
            let values = std::iter::once("@id".to_string())
                .chain((2..=params.len()).map(|n| format!("@P{}", n)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "SET XACT_ABORT ON; \
                 BEGIN TRANSACTION; \
                 DECLARE @id INT = @P1; \
                 IF @id IS NULL SELECT @id = ISNULL(MAX({id_col}), 0) + 1 FROM {table} WITH (UPDLOCK, HOLDLOCK); \
                 INSERT INTO {table} ({columns}) VALUES ({values}); \
                 COMMIT TRANSACTION; \
                 SELECT @id AS id;",
                id_col = quoted(id.column),
                table = table,
                columns = columns,
                values = values,
            )
        }
        IdPolicy::Identity => {
            for field in &data_fields {
                params.push(param_for(field, record.get(field.name))?);
            }
            format!(
                "INSERT INTO {} ({}) OUTPUT INSERTED.{} AS id VALUES ({})",
                table,
                data_fields.iter().map(|f| quoted(f.column)).collect::<Vec<_>>().join(", "),
                quoted(id.column),
                placeholders(1, params.len())
            )
        }
        IdPolicy::Supplied => {
            params.push(id_param);
            for field in &data_fields {
                params.push(param_for(field, record.get(field.name))?);
            }
            format!(
                "INSERT INTO {} ({}) VALUES ({}); SELECT CAST(@P1 AS INT) AS id;",
                table,
                meta.fields.iter().map(|f| quoted(f.column)).collect::<Vec<_>>().join(", "),
                placeholders(1, params.len())
            )
        }
    };
    Ok((sql, params))
}

pub fn update(meta: &EntityMeta, id: i64, record: &Record) -> Result<(String, Vec<SqlParam>), DbError> {
    let mut params = Vec::new();
    let mut assignments = Vec::new();
    for field in meta.fields.iter().skip(1) {
        params.push(param_for(field, record.get(field.name))?);
        assignments.push(format!("{} = @P{}", quoted(field.column), params.len()));
    }
    params.push(SqlParam::BigInt(id));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = @P{}",
        quoted(meta.table),
        assignments.join(", "),
        quoted(meta.id_field().column),
        params.len()
    );
    Ok((sql, params))
}

pub fn delete(meta: &EntityMeta) -> String {
    format!(
        "DELETE FROM {} WHERE {} = @P1",
        quoted(meta.table),
        quoted(meta.id_field().column)
    )
}

/// `@Pfrom, ..., @Pto`
pub fn placeholders(from: usize, to: usize) -> String {
    (from..=to)
        .map(|n| format!("@P{}", n))
        .collect::<Vec<_>>()
        .join(", ")
}
