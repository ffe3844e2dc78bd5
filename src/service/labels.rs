//! Database-backed display labels.
//!
//! Labels are resolved once per request into an immutable [`LabelSet`] and
//! carried in a [`LabelContext`] request extension. Entity metadata is
//! never touched: rendering code asks the context for display names.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::db::LabelStore;
use crate::error::DbError;
use crate::models::{EntityMeta, LabelEntry, SECTIONS};

/// Order given to entities without a `model.<x>.name_plural` label.
pub const DEFAULT_MODEL_ORDER: i32 = 999;

/// Every label of one language, in the shapes the pages use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSet {
    language: String,
    flat: HashMap<String, String>,
    nested: Map<String, Value>,
    orders: BTreeMap<String, i32>,
}

impl LabelSet {
    pub fn empty(language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..Self::default()
        }
    }

    pub fn from_entries(language: &str, entries: &[LabelEntry]) -> Self {
        let mut set = Self::empty(language);
        for entry in entries {
            set.flat.insert(entry.key.clone(), entry.value.clone());
            insert_nested(&mut set.nested, &entry.key, &entry.value);
            if let Some(model) = plural_model_key(&entry.key) {
                set.orders.insert(model, entry.display_order);
            }
        }
        set
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.flat.get(key).map(String::as_str)
    }

    /// First candidate key that has a label.
    pub fn first_of<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Option<&str> {
        keys.into_iter().find_map(|key| self.get(key))
    }

    /// Keys split on `.`: `nested["model"]["devise"]["name_plural"]`.
    pub fn nested(&self) -> &Map<String, Value> {
        &self.nested
    }

    /// `admin_label_<key with . replaced by _>` aliases for older templates.
    pub fn flat_aliases(&self) -> Map<String, Value> {
        self.flat
            .iter()
            .map(|(key, value)| {
                (
                    format!("admin_label_{}", key.replace('.', "_")),
                    Value::String(value.clone()),
                )
            })
            .collect()
    }

    /// Display order per lowercase model name.
    pub fn model_orders(&self) -> &BTreeMap<String, i32> {
        &self.orders
    }

    pub fn model_order(&self, model_name: &str) -> i32 {
        self.orders
            .get(&model_name.to_lowercase())
            .copied()
            .unwrap_or(DEFAULT_MODEL_ORDER)
    }

    /// Template context: flat aliases plus `admin_labels` (nested, with
    /// `model_orders`).
    pub fn template_context(&self) -> Map<String, Value> {
        let mut nested = self.nested.clone();
        nested.insert(
            "model_orders".to_string(),
            Value::Object(
                self.orders
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(*v)))
                    .collect(),
            ),
        );
        let mut context = self.flat_aliases();
        context.insert("admin_labels".to_string(), Value::Object(nested));
        context
    }
}

/// A leaf met on the way down is replaced by an object; the flat view
/// keeps the original value.
pub fn insert_nested(root: &mut Map<String, Value>, key: &str, value: &str) {
    let parts: Vec<&str> = key.split('.').collect();
    let Some((last, parents)) = parts.split_last() else {
        return;
    };

    let mut current = root;
    for part in parents {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), Value::String(value.to_string()));
}

/// `model.<x>.name_plural` → `x` lowercased.
fn plural_model_key(key: &str) -> Option<String> {
    let rest = key.strip_prefix("model.")?;
    let model = rest.strip_suffix(".name_plural")?;
    if model.is_empty() || model.contains('.') {
        return None;
    }
    Some(model.to_lowercase())
}

/// Fetches label sets with fallback to the default language.
#[derive(Clone)]
pub struct LabelResolver {
    store: Arc<dyn LabelStore>,
    default_language: String,
}

impl LabelResolver {
    pub fn new(store: Arc<dyn LabelStore>, default_language: impl Into<String>) -> Self {
        Self {
            store,
            default_language: default_language.into(),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Labels for `language`, or for the default language when the
    /// requested one has no rows.
    pub async fn resolve(&self, language: &str) -> Result<LabelSet, DbError> {
        let entries = self.store.labels_for_language(language).await?;
        if !entries.is_empty() || language == self.default_language {
            return Ok(LabelSet::from_entries(language, &entries));
        }

        tracing::debug!(
            "no labels for '{}', falling back to '{}'",
            language,
            self.default_language
        );
        let entries = self
            .store
            .labels_for_language(&self.default_language)
            .await?;
        Ok(LabelSet::from_entries(&self.default_language, &entries))
    }

    /// Label lookups never fail a page: errors give an empty set.
    pub async fn resolve_or_empty(&self, language: &str) -> LabelSet {
        match self.resolve(language).await {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!("label resolution failed for '{}': {}", language, e);
                LabelSet::empty(language)
            }
        }
    }
}

/// Language for one request: explicit `lang`, then `Accept-Language`,
/// then the configured default.
pub fn pick_language(query_lang: Option<&str>, accept_language: Option<&str>, default: &str) -> String {
    query_lang
        .and_then(primary_subtag)
        .or_else(|| {
            accept_language
                .and_then(|header| header.split(',').next())
                .and_then(|tag| tag.split(';').next())
                .and_then(primary_subtag)
        })
        .unwrap_or_else(|| default.to_string())
}

fn primary_subtag(tag: &str) -> Option<String> {
    let primary = tag.trim().split(['-', '_']).next()?.trim();
    let valid = !primary.is_empty()
        && primary.len() <= 5
        && primary.chars().all(|c| c.is_ascii_alphabetic());
    valid.then(|| primary.to_ascii_lowercase())
}

/// Per-request label view attached by middleware.
#[derive(Debug, Clone)]
pub struct LabelContext {
    labels: Arc<LabelSet>,
}

impl LabelContext {
    pub fn new(labels: LabelSet) -> Self {
        Self {
            labels: Arc::new(labels),
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn language(&self) -> &str {
        self.labels.language()
    }

    pub fn display_names(&self, entity: &dyn Localizable) -> DisplayNames {
        entity.display_names(&self.labels)
    }

    /// `section.<app_label>`, else the built-in section title.
    pub fn section_title(&self, app_label: &str) -> String {
        let key = format!("section.{}", app_label);
        match self.labels.get(&key) {
            Some(title) => title.to_string(),
            None => SECTIONS
                .iter()
                .find(|(app, _)| *app == app_label)
                .map(|(_, title)| title.to_string())
                .unwrap_or_else(|| app_label.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayNames {
    pub singular: String,
    pub plural: String,
}

/// Anything whose human name can be overridden by a label.
pub trait Localizable {
    /// Candidate keys, most specific first, for `suffix`
    /// (`name_single` or `name_plural`).
    fn label_keys(&self, suffix: &str) -> Vec<String>;

    fn default_names(&self) -> DisplayNames;

    fn display_names(&self, labels: &LabelSet) -> DisplayNames {
        let defaults = self.default_names();
        let lookup = |suffix: &str, fallback: String| {
            let keys = self.label_keys(suffix);
            labels
                .first_of(keys.iter().map(String::as_str))
                .map(str::to_string)
                .unwrap_or(fallback)
        };
        DisplayNames {
            singular: lookup("name_single", defaults.singular),
            plural: lookup("name_plural", defaults.plural),
        }
    }
}

impl Localizable for EntityMeta {
    fn label_keys(&self, suffix: &str) -> Vec<String> {
        vec![
            format!("model.{}.{}", self.model_name, suffix),
            format!("model.{}.{}", self.declared_name, suffix),
        ]
    }

    fn default_names(&self) -> DisplayNames {
        DisplayNames {
            singular: self.verbose_name.to_string(),
            plural: self.verbose_name_plural.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{DEVISE, SOCIETE};
    use proptest::prelude::*;

    fn store_with(entries: &[LabelEntry]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_labels(entries).unwrap();
        store
    }

    #[tokio::test]
    async fn test_falls_back_to_default_language() {
        let store = store_with(&[LabelEntry::new("fr", "site.title", "Port Adhoc", 1)]);
        let resolver = LabelResolver::new(store, "fr");

        let labels = resolver.resolve("en").await.unwrap();
        assert_eq!(labels.language(), "fr");
        assert_eq!(labels.get("site.title"), Some("Port Adhoc"));
    }

    #[tokio::test]
    async fn test_requested_language_wins_when_present() {
        let store = store_with(&[
            LabelEntry::new("fr", "site.title", "Titre", 1),
            LabelEntry::new("en", "site.title", "Title", 1),
        ]);
        let resolver = LabelResolver::new(store, "fr");
        assert_eq!(resolver.resolve("en").await.unwrap().get("site.title"), Some("Title"));
    }

    #[tokio::test]
    async fn test_no_labels_anywhere_is_empty() {
        let resolver = LabelResolver::new(Arc::new(MemoryStore::new()), "fr");
        assert!(resolver.resolve("de").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_resolves_to_empty() {
        let store = store_with(&[LabelEntry::new("fr", "site.title", "Titre", 1)]);
        store.set_unavailable(true);
        let resolver = LabelResolver::new(store, "fr");

        assert!(resolver.resolve("fr").await.is_err());
        assert!(resolver.resolve_or_empty("fr").await.is_empty());
    }

    #[test]
    fn test_nested_flat_and_orders() {
        let set = LabelSet::from_entries(
            "fr",
            &[
                LabelEntry::new("fr", "model.Devise.name_plural", "Monnaies", 3),
                LabelEntry::new("fr", "site.title", "Compta", 0),
            ],
        );

        assert_eq!(
            set.nested()["model"]["Devise"]["name_plural"],
            Value::String("Monnaies".into())
        );
        assert_eq!(
            set.flat_aliases()["admin_label_model_Devise_name_plural"],
            Value::String("Monnaies".into())
        );
        assert_eq!(set.model_order("devise"), 3);
        assert_eq!(set.model_order("societe"), DEFAULT_MODEL_ORDER);

        let context = set.template_context();
        assert_eq!(context["admin_labels"]["model_orders"]["devise"], Value::from(3));
        assert_eq!(context["admin_labels"]["site"]["title"], Value::String("Compta".into()));
    }

    #[test]
    fn test_leaf_then_branch_keeps_both_views() {
        let set = LabelSet::from_entries(
            "fr",
            &[
                LabelEntry::new("fr", "site", "Site", 0),
                LabelEntry::new("fr", "site.title", "Titre", 0),
            ],
        );
        assert_eq!(set.get("site"), Some("Site"));
        assert_eq!(set.nested()["site"]["title"], Value::String("Titre".into()));
    }

    #[test]
    fn test_display_names_prefer_lowercase_key() {
        let set = LabelSet::from_entries(
            "fr",
            &[
                LabelEntry::new("fr", "model.Societe.name_plural", "Entités", 1),
                LabelEntry::new("fr", "model.societe.name_plural", "Filiales", 1),
                LabelEntry::new("fr", "model.Devise.name_single", "Monnaie", 1),
            ],
        );
        let context = LabelContext::new(set);

        assert_eq!(context.display_names(&SOCIETE).plural, "Filiales");
        assert_eq!(context.display_names(&SOCIETE).singular, "Société");
        let devise = context.display_names(&DEVISE);
        assert_eq!(devise.singular, "Monnaie");
        assert_eq!(devise.plural, "Devises");
    }

    #[test]
    fn test_display_names_are_stable_across_lookups() {
        let context = LabelContext::new(LabelSet::from_entries(
            "fr",
            &[LabelEntry::new("fr", "model.stade.name_plural", "Étapes", 1)],
        ));
        let first = context.display_names(&crate::models::STADE);
        let second = context.display_names(&crate::models::STADE);
        assert_eq!(first, second);
        assert_eq!(crate::models::STADE.verbose_name_plural, "Stades");
    }

    #[test]
    fn test_section_titles() {
        let context = LabelContext::new(LabelSet::from_entries(
            "fr",
            &[LabelEntry::new("fr", "section.referentiel", "Données de référence", 1)],
        ));
        assert_eq!(context.section_title("referentiel"), "Données de référence");
        assert_eq!(context.section_title("comptabilite"), "Comptabilité");
    }

    #[test]
    fn test_pick_language() {
        assert_eq!(pick_language(Some("EN"), Some("de-DE"), "fr"), "en");
        assert_eq!(pick_language(None, Some("de-DE,de;q=0.9,en;q=0.8"), "fr"), "de");
        assert_eq!(pick_language(Some(""), None, "fr"), "fr");
        assert_eq!(pick_language(None, Some("*"), "fr"), "fr");
    }

    proptest! {
        #[test]
        fn prop_every_key_reachable_in_nested_view(
            segments in proptest::collection::vec("[a-z]{1,6}", 1..4),
            value in "[A-Za-z ]{0,12}",
        ) {
            let key = segments.join(".");
            let set = LabelSet::from_entries("fr", &[LabelEntry::new("fr", &key, &value, 0)]);

            let mut node = &Value::Object(set.nested().clone());
            for segment in &segments {
                node = &node[segment.as_str()];
            }
            prop_assert_eq!(node, &Value::String(value.clone()));
            let alias = format!("admin_label_{}", segments.join("_"));
            prop_assert_eq!(&set.flat_aliases()[&alias], &Value::String(value));
        }
    }
}
