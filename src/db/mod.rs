pub mod memory;
pub mod pool;
pub mod procedures;
pub mod queries;
pub mod sql;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DbError;
use crate::models::{
    EntityMeta, FactsImport, FinancialFact, ImportSource, LabelEntry, PerimetreSociete,
    ProcedureOutput, Record, SearchParams, StagingRow,
};

pub use memory::MemoryStore;
pub use pool::{create_pool, SqlPool};
pub use procedures::SqlServerGateway;
pub use queries::SqlServerRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: &'static str,
    pub descending: bool,
}

/// A validated list request: every field name comes from the entity's
/// declared search/filter/sort lists.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub search: Option<String>,
    pub filters: Vec<(&'static str, Value)>,
    pub sort: Vec<SortKey>,
    pub offset: u64,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct PageRows {
    pub rows: Vec<Record>,
    pub total: u64,
}

/// CRUD over the legacy reference tables.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list(&self, meta: &'static EntityMeta, query: &ListQuery) -> Result<PageRows, DbError>;

    async fn get(&self, meta: &'static EntityMeta, id: i64) -> Result<Option<Record>, DbError>;

    /// Insert and return the stored identifier.
    async fn insert(&self, meta: &'static EntityMeta, record: Record) -> Result<i64, DbError>;

    async fn update(&self, meta: &'static EntityMeta, id: i64, record: Record) -> Result<bool, DbError>;

    async fn delete(&self, meta: &'static EntityMeta, id: i64) -> Result<bool, DbError>;

    async fn count(&self, meta: &'static EntityMeta) -> Result<u64, DbError>;

    async fn scope_companies(&self, perimetre: i32) -> Result<Vec<i32>, DbError>;

    /// Returns `false` when the pair already existed.
    async fn link_scope_company(&self, link: PerimetreSociete) -> Result<bool, DbError>;

    async fn unlink_scope_company(&self, link: PerimetreSociete) -> Result<bool, DbError>;
}

/// Read side of the admin label table.
#[async_trait]
pub trait LabelStore: Send + Sync {
    async fn labels_for_language(&self, language: &str) -> Result<Vec<LabelEntry>, DbError>;
}

/// Stored procedures and the staging table behind the écritures screens.
#[async_trait]
pub trait EcrituresGateway: Send + Sync {
    async fn search(&self, params: &SearchParams) -> Result<ProcedureOutput, DbError>;

    async fn insert_fact(&self, fact: &FinancialFact) -> Result<(), DbError>;

    async fn insert_facts(&self, source: ImportSource, request: &FactsImport) -> Result<(), DbError>;

    /// Empty the staging table and load `rows`; returns the inserted count.
    async fn replace_staging(&self, rows: &[StagingRow]) -> Result<u64, DbError>;
}
