use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;
use tiberius::Row;

use crate::db::sql::{self, SqlParam};
use crate::db::{LabelStore, ListQuery, PageRows, Repository, SortKey, SqlPool};
use crate::error::DbError;
use crate::models::{
    EntityMeta, LabelEntry, PerimetreSociete, Record, ADMIN_TEXT, PERIMETRE_SOCIETE_TABLE,
};

/// Reference tables and admin labels on SQL Server.
#[derive(Clone)]
pub struct SqlServerRepository {
    pool: SqlPool,
}

impl SqlServerRepository {
    pub fn new(pool: SqlPool) -> Self {
        Self { pool }
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, DbError> {
        let mut conn = self.pool.get().await?;
        let refs = sql::as_dyn(params);
        let rows = conn
            .query(sql, &refs)
            .await
            .map_err(DbError::from_sql)?
            .into_first_result()
            .await
            .map_err(DbError::from_sql)?;
        Ok(rows)
    }

    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError> {
        let mut conn = self.pool.get().await?;
        let refs = sql::as_dyn(params);
        let result = conn.execute(sql, &refs).await.map_err(DbError::from_sql)?;
        Ok(result.total())
    }
}

fn read_total(row: Option<Row>) -> Result<u64, DbError> {
    let total = match row {
        Some(row) => row
            .try_get::<i32, _>("total")
            .map_err(|e| DbError::decode("total", e.to_string()))?
            .unwrap_or(0),
        None => 0,
    };
    Ok(u64::try_from(total).unwrap_or(0))
}

#[async_trait]
impl Repository for SqlServerRepository {
    async fn list(&self, meta: &'static EntityMeta, query: &ListQuery) -> Result<PageRows, DbError> {
        let (select_sql, count_sql, params) = sql::select_page(meta, query)?;
        let start = Instant::now();

        let mut conn = self.pool.get().await?;
        let refs = sql::as_dyn(&params);

        let count_row = conn
            .query(count_sql.as_str(), &refs)
            .await
            .map_err(DbError::from_sql)?
            .into_row()
            .await
            .map_err(DbError::from_sql)?;
        let total = read_total(count_row)?;

        let rows = conn
            .query(select_sql.as_str(), &refs)
            .await
            .map_err(DbError::from_sql)?
            .into_first_result()
            .await
            .map_err(DbError::from_sql)?;

        tracing::debug!(
            "{}: {} of {} rows in {:?}",
            meta.table,
            rows.len(),
            total,
            start.elapsed()
        );

        Ok(PageRows {
            rows: rows.into_iter().map(sql::record_from_row).collect(),
            total,
        })
    }

    async fn get(&self, meta: &'static EntityMeta, id: i64) -> Result<Option<Record>, DbError> {
        let rows = self
            .fetch_all(&sql::select_one(meta), &[SqlParam::BigInt(id)])
            .await?;
        Ok(rows.into_iter().next().map(sql::record_from_row))
    }

    async fn insert(&self, meta: &'static EntityMeta, record: Record) -> Result<i64, DbError> {
        let (insert_sql, params) = sql::insert(meta, &record)?;
        let mut conn = self.pool.get().await?;
        let refs = sql::as_dyn(&params);

        let mut result_sets = conn
            .query(insert_sql.as_str(), &refs)
            .await
            .map_err(DbError::from_sql)?
            .into_results()
            .await
            .map_err(DbError::from_sql)?;

        let id = result_sets
            .pop()
            .and_then(|rows| rows.into_iter().next())
            .map(|row| row.try_get::<i32, _>("id"))
            .transpose()
            .map_err(|e| DbError::decode("id", e.to_string()))?
            .flatten()
            .ok_or_else(|| DbError::decode("id", "insert returned no identifier"))?;

        tracing::info!("{}: inserted row {}", meta.table, id);
        Ok(i64::from(id))
    }

    async fn update(&self, meta: &'static EntityMeta, id: i64, record: Record) -> Result<bool, DbError> {
        let (update_sql, params) = sql::update(meta, id, &record)?;
        let affected = self.execute(&update_sql, &params).await?;
        tracing::info!("{}: updated row {} ({} affected)", meta.table, id, affected);
        Ok(affected > 0)
    }

    async fn delete(&self, meta: &'static EntityMeta, id: i64) -> Result<bool, DbError> {
        let affected = self
            .execute(&sql::delete(meta), &[SqlParam::BigInt(id)])
            .await?;
        tracing::info!("{}: deleted row {} ({} affected)", meta.table, id, affected);
        Ok(affected > 0)
    }

    async fn count(&self, meta: &'static EntityMeta) -> Result<u64, DbError> {
        let rows = self.fetch_all(&sql::count_all(meta), &[]).await?;
        read_total(rows.into_iter().next())
    }

    async fn scope_companies(&self, perimetre: i32) -> Result<Vec<i32>, DbError> {
        let query = format!(
            "SELECT [SOC_Id] FROM [{}] WHERE [PEC_Id] = @P1 ORDER BY [SOC_Id]",
            PERIMETRE_SOCIETE_TABLE
        );
        let rows = self
            .fetch_all(&query, &[SqlParam::Int(Some(perimetre))])
            .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<i32, _>(0)
                    .map_err(|e| DbError::decode("SOC_Id", e.to_string()))?
                    .ok_or_else(|| DbError::decode("SOC_Id", "null company id"))
            })
            .collect()
    }

    async fn link_scope_company(&self, link: PerimetreSociete) -> Result<bool, DbError> {
        let query = format!(
            "IF NOT EXISTS (SELECT 1 FROM [{table}] WITH (UPDLOCK, HOLDLOCK) \
                            WHERE [PEC_Id] = @P1 AND [SOC_Id] = @P2) \
             INSERT INTO [{table}] ([PEC_Id], [SOC_Id]) VALUES (@P1, @P2)",
            table = PERIMETRE_SOCIETE_TABLE
        );
        let affected = self
            .execute(
                &query,
                &[
                    SqlParam::Int(Some(link.perimetre)),
                    SqlParam::Int(Some(link.societe)),
                ],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn unlink_scope_company(&self, link: PerimetreSociete) -> Result<bool, DbError> {
        let query = format!(
            "DELETE FROM [{}] WHERE [PEC_Id] = @P1 AND [SOC_Id] = @P2",
            PERIMETRE_SOCIETE_TABLE
        );
        let affected = self
            .execute(
                &query,
                &[
                    SqlParam::Int(Some(link.perimetre)),
                    SqlParam::Int(Some(link.societe)),
                ],
            )
            .await?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl LabelStore for SqlServerRepository {
    async fn labels_for_language(&self, language: &str) -> Result<Vec<LabelEntry>, DbError> {
        let query = ListQuery {
            filters: vec![("language", json!(language))],
            sort: vec![
                SortKey { field: "display_order", descending: false },
                SortKey { field: "key", descending: false },
            ],
            ..ListQuery::default()
        };
        let (select_sql, _, params) = sql::select_page(&ADMIN_TEXT, &query)?;
        let rows = self.fetch_all(&select_sql, &params).await?;

        rows.into_iter()
            .map(|row| {
                let mut record = sql::record_from_row(row);
                // NULL display orders fall back to the serde default
                record.retain(|_, v| !v.is_null());
                serde_json::from_value(serde_json::Value::Object(record))
                    .map_err(|e| DbError::decode(ADMIN_TEXT.table, e.to_string()))
            })
            .collect()
    }
}
