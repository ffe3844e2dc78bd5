use serde::{Deserialize, Serialize};
use std::fmt;

use super::meta::{describe, normalize, EntityMeta, Field, IdPolicy, Model};

/// Localized admin string (T_E_AdminText_ADT), unique per `(language, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default = "default_language")]
    pub language: String,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub display_order: i32,
}

fn default_language() -> String {
    "fr".to_string()
}

impl LabelEntry {
    pub fn new(language: &str, key: &str, value: &str, display_order: i32) -> Self {
        Self {
            id: None,
            language: language.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            display_order,
        }
    }
}

pub static ADMIN_TEXT: EntityMeta = EntityMeta {
    app_label: "parametres",
    model_name: "admintext",
    declared_name: "AdminText",
    slug: "admin-texts",
    table: "T_E_AdminText_ADT",
    verbose_name: "Libellé Admin",
    verbose_name_plural: "Libellés Admin",
    id_policy: IdPolicy::Identity,
    fields: &[
        Field::int("id", "id"),
        Field::text("language", "language").max(5).required(),
        Field::text("key", "key").max(100).required(),
        Field::text("value", "value").max(255).required(),
        Field::int("display_order", "ADT_DisplayOrder"),
    ],
    search: &["key", "value"],
    filters: &["language"],
    sortable: &["id", "language", "display_order", "key"],
    default_sort: &["language", "display_order", "key"],
    foreign_keys: &[],
    unique_together: &[&["language", "key"]],
    normalize: normalize::<LabelEntry>,
    describe: describe::<LabelEntry>,
};

impl Model for LabelEntry {
    fn meta() -> &'static EntityMeta {
        &ADMIN_TEXT
    }
}

impl fmt::Display for LabelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}", self.language, self.key, self.value)
    }
}
