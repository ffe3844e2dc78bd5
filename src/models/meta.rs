//! Static descriptions of the legacy tables.
//!
//! Every reference entity is a plain serde struct plus one `EntityMeta`
//! describing how it maps onto its SQL Server table: columns, identifier
//! policy, searchable and sortable fields, filters and foreign keys. The
//! metadata is `'static` and never mutated; localized names are looked up
//! per request through [`crate::service::labels::LabelContext`].

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Text,
    Bool,
    DateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    pub max_len: Option<usize>,
    pub required: bool,
    pub unique: bool,
}

impl Field {
    pub const fn int(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldKind::Int)
    }

    pub const fn text(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldKind::Text)
    }

    pub const fn boolean(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldKind::Bool)
    }

    pub const fn datetime(name: &'static str, column: &'static str) -> Self {
        Self::new(name, column, FieldKind::DateTime)
    }

    const fn new(name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            column,
            kind,
            max_len: None,
            required: false,
            unique: false,
        }
    }

    pub const fn max(mut self, len: usize) -> Self {
        self.max_len = Some(len);
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// How the primary key of a new row is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// `MAX(id) + 1` under a table lock when the caller leaves it empty.
    NextMax,
    /// SQL Server IDENTITY column.
    Identity,
    /// The caller must provide it (tables the application does not own).
    Supplied,
}

#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub field: &'static str,
    pub target: &'static EntityMeta,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    View,
    Add,
    Change,
    Delete,
}

impl Capability {
    pub fn verb(self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Add => "add",
            Capability::Change => "change",
            Capability::Delete => "delete",
        }
    }
}

pub struct EntityMeta {
    /// Django-style application label, used for permissions and sections.
    pub app_label: &'static str,
    /// Canonical lowercase model name (`societe`).
    pub model_name: &'static str,
    /// Declared type name (`Societe`), tried after the lowercase form.
    pub declared_name: &'static str,
    /// URL segment for pages and the REST API.
    pub slug: &'static str,
    pub table: &'static str,
    pub verbose_name: &'static str,
    pub verbose_name_plural: &'static str,
    pub id_policy: IdPolicy,
    /// First field is always the primary key.
    pub fields: &'static [Field],
    pub search: &'static [&'static str],
    pub filters: &'static [&'static str],
    pub sortable: &'static [&'static str],
    pub default_sort: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
    pub unique_together: &'static [&'static [&'static str]],
    /// Round-trips a submitted payload through the typed model.
    pub normalize: fn(Value) -> Result<Record, AppError>,
    /// Human-readable description of a stored row.
    pub describe: fn(&Record) -> String,
}

impl std::fmt::Debug for EntityMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityMeta")
            .field("model_name", &self.model_name)
            .field("table", &self.table)
            .finish()
    }
}

impl EntityMeta {
    pub fn id_field(&self) -> &Field {
        &self.fields[0]
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Django permission codename, e.g. `comptabilite.add_societe`.
    pub fn permission(&self, capability: Capability) -> String {
        format!("{}.{}_{}", self.app_label, capability.verb(), self.model_name)
    }

    /// Check lengths and blank required text on a normalized record.
    pub fn validate(&self, record: &Record) -> Result<(), AppError> {
        for field in self.fields.iter().skip(1) {
            let value = record.get(field.name).unwrap_or(&Value::Null);
            if let Value::String(s) = value {
                if field.required && s.trim().is_empty() {
                    return Err(AppError::Validation(format!(
                        "{}: this field is required",
                        field.name
                    )));
                }
                if let Some(max) = field.max_len {
                    if s.chars().count() > max {
                        return Err(AppError::Validation(format!(
                            "{}: at most {} characters",
                            field.name, max
                        )));
                    }
                }
            } else if value.is_null() && field.required {
                return Err(AppError::Validation(format!(
                    "{}: this field is required",
                    field.name
                )));
            }
        }
        Ok(())
    }
}

/// Typed view of a legacy table.
pub trait Model: Serialize + DeserializeOwned + std::fmt::Display {
    fn meta() -> &'static EntityMeta;
}

pub fn normalize<M: Model>(payload: Value) -> Result<Record, AppError> {
    let model: M = serde_json::from_value(payload)
        .map_err(|e| AppError::Validation(format!("{}: {}", M::meta().model_name, e)))?;
    match serde_json::to_value(model)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Validation(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

pub fn describe<M: Model>(record: &Record) -> String {
    serde_json::from_value::<M>(Value::Object(record.clone()))
        .map(|m| m.to_string())
        .unwrap_or_default()
}
