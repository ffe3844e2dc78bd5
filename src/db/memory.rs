//! In-process storage used for local development and the test suite.
//!
//! Mirrors the SQL Server behaviour the services rely on: identifier
//! policies, unique constraints, search/filter/sort semantics, the
//! scope/company link table, the staging table and the procedure calls.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tokio::sync::Mutex;

use crate::db::{EcrituresGateway, LabelStore, ListQuery, PageRows, Repository, SortKey};
use crate::error::DbError;
use crate::models::{
    EntityMeta, FactsImport, FieldKind, FinancialFact, IdPolicy, ImportSource, LabelEntry,
    PerimetreSociete, ProcedureOutput, Record, SearchParams, StagingRow, ADMIN_TEXT,
    PERIMETRE_CONSO,
};

/// A stored procedure invocation captured by the memory store.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcedureCall {
    Search(SearchParams),
    InsertFact(FinancialFact),
    InsertFacts(ImportSource, FactsImport),
}

#[derive(Default)]
pub struct MemoryStore {
    tables: DashMap<&'static str, BTreeMap<i64, Record>>,
    links: Mutex<BTreeSet<PerimetreSociete>>,
    staging: Mutex<Vec<StagingRow>>,
    calls: Mutex<Vec<ProcedureCall>>,
    search_output: Mutex<ProcedureOutput>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as a lost database connection would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Result returned by the next search procedure calls.
    pub async fn set_search_output(&self, output: ProcedureOutput) {
        *self.search_output.lock().await = output;
    }

    pub async fn calls(&self) -> Vec<ProcedureCall> {
        self.calls.lock().await.clone()
    }

    pub async fn staging_rows(&self) -> Vec<StagingRow> {
        self.staging.lock().await.clone()
    }

    /// Store label rows directly, bypassing validation.
    pub fn seed_labels(&self, entries: &[LabelEntry]) -> Result<(), DbError> {
        for entry in entries {
            let record = match serde_json::to_value(entry) {
                Ok(Value::Object(map)) => map,
                _ => return Err(DbError::decode(ADMIN_TEXT.table, "label is not an object")),
            };
            self.insert_row(&ADMIN_TEXT, record)?;
        }
        Ok(())
    }

    fn check(&self) -> Result<(), DbError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            Err(DbError::Unavailable("memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }

    fn insert_row(&self, meta: &'static EntityMeta, record: Record) -> Result<i64, DbError> {
        let id_name = meta.id_field().name;
        let mut table = self.tables.entry(meta.table).or_default();
        let next = table.keys().next_back().copied().unwrap_or(0) + 1;

        let requested = record.get(id_name).and_then(Value::as_i64);
        let id = match meta.id_policy {
            IdPolicy::NextMax => requested.unwrap_or(next),
            IdPolicy::Identity => next,
            IdPolicy::Supplied => {
                requested.ok_or_else(|| DbError::decode(id_name, "identifier must be supplied"))?
            }
        };
        if table.contains_key(&id) {
            return Err(DbError::Conflict(format!(
                "{}: identifier {} already exists",
                meta.table, id
            )));
        }

        let row = shaped(meta, record, id);
        check_unique(meta, &table, &row, None)?;
        table.insert(id, row);
        Ok(id)
    }
}

/// Keep exactly the declared fields, missing ones as NULL.
fn shaped(meta: &EntityMeta, mut record: Record, id: i64) -> Record {
    let mut row = Record::new();
    for field in meta.fields {
        let value = record.remove(field.name).unwrap_or(Value::Null);
        row.insert(field.name.to_string(), value);
    }
    row.insert(meta.id_field().name.to_string(), Value::from(id));
    row
}

fn check_unique(
    meta: &EntityMeta,
    table: &BTreeMap<i64, Record>,
    row: &Record,
    skip: Option<i64>,
) -> Result<(), DbError> {
    let others = || table.iter().filter(move |(id, _)| Some(**id) != skip).map(|(_, r)| r);

    for field in meta.fields.iter().skip(1).filter(|f| f.unique) {
        let value = row.get(field.name).unwrap_or(&Value::Null);
        if !value.is_null() && others().any(|r| r.get(field.name) == Some(value)) {
            return Err(DbError::Conflict(format!(
                "{}: duplicate value {} for {}",
                meta.table, value, field.name
            )));
        }
    }
    for group in meta.unique_together {
        let key: Vec<&Value> = group.iter().map(|f| row.get(*f).unwrap_or(&Value::Null)).collect();
        let clash = others().any(|r| {
            group
                .iter()
                .zip(&key)
                .all(|(f, v)| r.get(*f).unwrap_or(&Value::Null) == *v)
        });
        if clash {
            return Err(DbError::Conflict(format!(
                "{}: duplicate ({})",
                meta.table,
                group.join(", ")
            )));
        }
    }
    Ok(())
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_lowercase()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn matches_search(meta: &EntityMeta, row: &Record, term: &str) -> bool {
    let needle = term.to_lowercase();
    meta.search.iter().any(|name| {
        row.get(*name)
            .and_then(cell_text)
            .map_or(false, |text| text.contains(&needle))
    })
}

/// NULLs sort first, text compares case-insensitively.
fn compare_values(kind: FieldKind, a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => match kind {
            FieldKind::Int => a.as_i64().cmp(&b.as_i64()),
            FieldKind::Bool => a.as_bool().cmp(&b.as_bool()),
            FieldKind::Text | FieldKind::DateTime => {
                let left = a.as_str().map(str::to_lowercase);
                let right = b.as_str().map(str::to_lowercase);
                left.cmp(&right)
            }
        },
    }
}

fn compare_rows(meta: &EntityMeta, sort: &[SortKey], a: &Record, b: &Record) -> Ordering {
    for key in sort {
        let Some(field) = meta.field(key.field) else {
            continue;
        };
        let ordering = compare_values(
            field.kind,
            a.get(key.field).unwrap_or(&Value::Null),
            b.get(key.field).unwrap_or(&Value::Null),
        );
        let ordering = if key.descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    let id = meta.id_field().name;
    compare_values(
        FieldKind::Int,
        a.get(id).unwrap_or(&Value::Null),
        b.get(id).unwrap_or(&Value::Null),
    )
}

#[async_trait]
impl Repository for MemoryStore {
    async fn list(&self, meta: &'static EntityMeta, query: &ListQuery) -> Result<PageRows, DbError> {
        self.check()?;
        let mut rows: Vec<Record> = match self.tables.get(meta.table) {
            Some(table) => table.values().cloned().collect(),
            None => Vec::new(),
        };

        if let Some(term) = query.search.as_deref().filter(|t| !t.is_empty()) {
            rows.retain(|row| matches_search(meta, row, term));
        }
        for (name, value) in &query.filters {
            rows.retain(|row| row.get(*name) == Some(value));
        }
        rows.sort_by(|a, b| compare_rows(meta, &query.sort, a, b));

        let total = rows.len() as u64;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let rows = match query.limit {
            Some(limit) => rows
                .into_iter()
                .skip(offset)
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect(),
            None => rows,
        };
        Ok(PageRows { rows, total })
    }

    async fn get(&self, meta: &'static EntityMeta, id: i64) -> Result<Option<Record>, DbError> {
        self.check()?;
        Ok(self
            .tables
            .get(meta.table)
            .and_then(|table| table.get(&id).cloned()))
    }

    async fn insert(&self, meta: &'static EntityMeta, record: Record) -> Result<i64, DbError> {
        self.check()?;
        self.insert_row(meta, record)
    }

    async fn update(&self, meta: &'static EntityMeta, id: i64, record: Record) -> Result<bool, DbError> {
        self.check()?;
        let mut table = self.tables.entry(meta.table).or_default();
        if !table.contains_key(&id) {
            return Ok(false);
        }
        let row = shaped(meta, record, id);
        check_unique(meta, &table, &row, Some(id))?;
        table.insert(id, row);
        Ok(true)
    }

    async fn delete(&self, meta: &'static EntityMeta, id: i64) -> Result<bool, DbError> {
        self.check()?;
        let removed = self
            .tables
            .get_mut(meta.table)
            .map_or(false, |mut table| table.remove(&id).is_some());
        if removed && std::ptr::eq(meta, &PERIMETRE_CONSO) {
            self.links
                .lock()
                .await
                .retain(|link| i64::from(link.perimetre) != id);
        }
        Ok(removed)
    }

    async fn count(&self, meta: &'static EntityMeta) -> Result<u64, DbError> {
        self.check()?;
        Ok(self
            .tables
            .get(meta.table)
            .map_or(0, |table| table.len() as u64))
    }

    async fn scope_companies(&self, perimetre: i32) -> Result<Vec<i32>, DbError> {
        self.check()?;
        Ok(self
            .links
            .lock()
            .await
            .iter()
            .filter(|link| link.perimetre == perimetre)
            .map(|link| link.societe)
            .collect())
    }

    async fn link_scope_company(&self, link: PerimetreSociete) -> Result<bool, DbError> {
        self.check()?;
        Ok(self.links.lock().await.insert(link))
    }

    async fn unlink_scope_company(&self, link: PerimetreSociete) -> Result<bool, DbError> {
        self.check()?;
        Ok(self.links.lock().await.remove(&link))
    }
}

#[async_trait]
impl LabelStore for MemoryStore {
    async fn labels_for_language(&self, language: &str) -> Result<Vec<LabelEntry>, DbError> {
        self.check()?;
        let rows: Vec<Record> = match self.tables.get(ADMIN_TEXT.table) {
            Some(table) => table
                .values()
                .filter(|row| row.get("language").and_then(Value::as_str) == Some(language))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let mut entries = rows
            .into_iter()
            .map(|mut row| {
                row.retain(|_, v| !v.is_null());
                serde_json::from_value::<LabelEntry>(Value::Object(row))
                    .map_err(|e| DbError::decode(ADMIN_TEXT.table, e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(entries)
    }
}

#[async_trait]
impl EcrituresGateway for MemoryStore {
    async fn search(&self, params: &SearchParams) -> Result<ProcedureOutput, DbError> {
        self.check()?;
        self.calls.lock().await.push(ProcedureCall::Search(params.clone()));
        Ok(self.search_output.lock().await.clone())
    }

    async fn insert_fact(&self, fact: &FinancialFact) -> Result<(), DbError> {
        self.check()?;
        self.calls.lock().await.push(ProcedureCall::InsertFact(fact.clone()));
        Ok(())
    }

    async fn insert_facts(&self, source: ImportSource, request: &FactsImport) -> Result<(), DbError> {
        self.check()?;
        self.calls
            .lock()
            .await
            .push(ProcedureCall::InsertFacts(source, request.clone()));
        Ok(())
    }

    async fn replace_staging(&self, rows: &[StagingRow]) -> Result<u64, DbError> {
        self.check()?;
        let mut staging = self.staging.lock().await;
        *staging = rows.to_vec();
        Ok(staging.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NATURE_COMPTE, PERIODE, SOCIETE};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn societe(code: &str, intitule: &str, groupe: bool) -> Record {
        record(json!({"code": code, "intitule": intitule, "groupe": groupe}))
    }

    #[tokio::test]
    async fn test_next_max_assigns_sequential_ids() {
        let store = MemoryStore::new();
        assert_eq!(store.insert(&SOCIETE, societe("A", "Alpha", false)).await.unwrap(), 1);
        assert_eq!(store.insert(&SOCIETE, societe("B", "Beta", false)).await.unwrap(), 2);

        let mut explicit = societe("C", "Gamma", false);
        explicit.insert("id".into(), json!(10));
        assert_eq!(store.insert(&SOCIETE, explicit).await.unwrap(), 10);
        assert_eq!(store.insert(&SOCIETE, societe("D", "Delta", false)).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_supplied_policy_requires_an_id() {
        let store = MemoryStore::new();
        let missing = record(json!({"annee": 2024, "mois": 1}));
        assert!(store.insert(&PERIODE, missing).await.is_err());

        let given = record(json!({"id": 202401, "annee": 2024, "mois": 1}));
        assert_eq!(store.insert(&PERIODE, given.clone()).await.unwrap(), 202401);
        assert!(matches!(
            store.insert(&PERIODE, given).await,
            Err(DbError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unique_fields_conflict() {
        let store = MemoryStore::new();
        store
            .insert(&NATURE_COMPTE, record(json!({"code": "ACT", "intitule": "Actif"})))
            .await
            .unwrap();
        let err = store
            .insert(&NATURE_COMPTE, record(json!({"code": "ACT", "intitule": "Actif bis"})))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unique_together_on_labels() {
        let store = MemoryStore::new();
        store
            .seed_labels(&[LabelEntry::new("fr", "section.referentiel", "Référentiel", 1)])
            .unwrap();
        let dup = record(json!({"language": "fr", "key": "section.referentiel", "value": "x"}));
        assert!(store.insert(&ADMIN_TEXT, dup).await.is_err());
        let other = record(json!({"language": "en", "key": "section.referentiel", "value": "x"}));
        assert!(store.insert(&ADMIN_TEXT, other).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_search_filter_sort_and_page() {
        let store = MemoryStore::new();
        store.insert(&SOCIETE, societe("PAC", "Port Adhoc", true)).await.unwrap();
        store.insert(&SOCIETE, societe("ZED", "Zed Port", true)).await.unwrap();
        store.insert(&SOCIETE, societe("ABC", "Autre", false)).await.unwrap();

        let query = ListQuery {
            search: Some("port".into()),
            filters: vec![("groupe", json!(true))],
            sort: vec![SortKey { field: "code", descending: true }],
            offset: 0,
            limit: Some(1),
        };
        let page = store.list(&SOCIETE, &query).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0]["code"], json!("ZED"));
    }

    #[tokio::test]
    async fn test_links_are_unique_per_pair() {
        let store = MemoryStore::new();
        let link = PerimetreSociete { perimetre: 1, societe: 4 };
        assert!(store.link_scope_company(link).await.unwrap());
        assert!(!store.link_scope_company(link).await.unwrap());
        assert_eq!(store.scope_companies(1).await.unwrap(), vec![4]);
        assert!(store.unlink_scope_company(link).await.unwrap());
        assert!(store.scope_companies(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_staging_is_replaced() {
        let store = MemoryStore::new();
        let first = vec![StagingRow::default(); 3];
        assert_eq!(store.replace_staging(&first).await.unwrap(), 3);
        let second = vec![StagingRow::from_cells(&[Some("SOC".into())])];
        assert_eq!(store.replace_staging(&second).await.unwrap(), 1);
        assert_eq!(store.staging_rows().await, second);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.count(&SOCIETE).await.is_err());
        assert!(store.labels_for_language("fr").await.is_err());
        store.set_unavailable(false);
        assert_eq!(store.count(&SOCIETE).await.unwrap(), 0);
    }
}
