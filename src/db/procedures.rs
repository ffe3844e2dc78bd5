use async_trait::async_trait;
use futures::TryStreamExt;
use std::future::Future;
use std::time::Instant;
use tiberius::{Client, QueryItem, Row};
use tokio::net::TcpStream;
use tokio_util::compat::Compat;

use crate::config::ProcedureConfig;
use crate::db::sql::{self, SqlParam};
use crate::db::{EcrituresGateway, SqlPool};
use crate::error::DbError;
use crate::models::{
    FactsImport, FinancialFact, ImportSource, ProcedureOutput, SearchParams, StagingRow,
    STAGING_COLUMNS,
};

type Connection = Client<Compat<TcpStream>>;

/// Rows per INSERT statement; 24 parameters each keeps a batch under the
/// 2100-parameter limit of SQL Server RPC calls.
const STAGING_CHUNK: usize = 80;

/// Pooled connections can come back with a transaction left open; roll it
/// back before starting the reload. XACT_ABORT makes any failed statement
/// abort the whole transaction server side.
const STAGING_BEGIN: &str = "IF @@TRANCOUNT > 0 ROLLBACK; SET XACT_ABORT ON; BEGIN TRANSACTION";

/// Stored procedures and staging table of the écritures screens.
#[derive(Clone)]
pub struct SqlServerGateway {
    pool: SqlPool,
    procedures: ProcedureConfig,
}

impl SqlServerGateway {
    pub fn new(pool: SqlPool, procedures: ProcedureConfig) -> Self {
        Self { pool, procedures }
    }
}

/// Procedure and table names come from configuration, not from requests,
/// but are still restricted to `[A-Za-z0-9_.]`.
fn object_name(name: &str) -> Result<&str, DbError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(name)
    } else {
        Err(DbError::decode(name, "invalid database object name"))
    }
}

pub fn search_batch(procedure: &str) -> Result<String, DbError> {
    Ok(format!(
        "DECLARE @MessageErreur NVARCHAR(4000); \
         EXEC {} {}, @MessageErreur OUTPUT; \
         SELECT @MessageErreur AS MessageErreur;",
        object_name(procedure)?,
        sql::placeholders(1, 9)
    ))
}

pub fn search_params(params: &SearchParams) -> Vec<SqlParam> {
    vec![
        SqlParam::Int(params.periode_id),
        SqlParam::Int(params.stade_id),
        SqlParam::Int(params.societe_id),
        SqlParam::Int(params.type_valeur_id),
        SqlParam::Text(params.compte.clone()),
        SqlParam::Text(params.solde.clone()),
        SqlParam::Text(params.axe1.clone()),
        SqlParam::Text(params.axe2.clone()),
        SqlParam::Text(params.axe3.clone()),
    ]
}

pub fn fact_params(fact: &FinancialFact) -> Vec<SqlParam> {
    vec![
        SqlParam::Int(fact.version_id),
        SqlParam::Int(fact.lot_id),
        SqlParam::Int(fact.compte_id),
        SqlParam::Int(fact.axe1_id),
        SqlParam::Int(fact.axe2_id),
        SqlParam::Int(fact.axe3_id),
        SqlParam::Int(Some(fact.type_valeur_id)),
        SqlParam::Int(Some(fact.periode_id)),
        SqlParam::Decimal(fact.montant.clone()),
    ]
}

pub fn facts_import_params(request: &FactsImport) -> Vec<SqlParam> {
    vec![
        SqlParam::Bool(Some(request.actualiser)),
        SqlParam::Int(Some(request.societe_id)),
        SqlParam::Int(Some(request.stade_id)),
        SqlParam::Int(Some(request.periode_key)),
        SqlParam::Bool(Some(request.forcer)),
        SqlParam::Int(request.version_id),
        SqlParam::Text(request.libelle.clone()),
    ]
}

/// Multi-row insert into the staging table for one chunk.
pub fn staging_insert(table: &str, rows: &[StagingRow]) -> Result<(String, Vec<SqlParam>), DbError> {
    let columns = STAGING_COLUMNS
        .iter()
        .map(|c| format!("[{}]", c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut params = Vec::with_capacity(rows.len() * STAGING_COLUMNS.len());
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let first = params.len() + 1;
        params.extend(row.values.iter().cloned().map(SqlParam::Text));
        tuples.push(format!("({})", sql::placeholders(first, params.len())));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        object_name(table)?,
        columns,
        tuples.join(", ")
    );
    Ok((sql, params))
}

/// Split a procedure response into column names and rows per result set.
async fn collect_sets(
    conn: &mut Connection,
    batch: &str,
    params: &[SqlParam],
) -> Result<Vec<(Vec<String>, Vec<Row>)>, DbError> {
    let refs = sql::as_dyn(params);
    let mut stream = conn.query(batch, &refs).await.map_err(DbError::from_sql)?;

    let mut sets: Vec<(Vec<String>, Vec<Row>)> = Vec::new();
    while let Some(item) = stream.try_next().await.map_err(DbError::from_sql)? {
        match item {
            QueryItem::Metadata(meta) => {
                let names = meta.columns().iter().map(|c| c.name().to_string()).collect();
                sets.push((names, Vec::new()));
            }
            QueryItem::Row(row) => {
                if let Some((_, rows)) = sets.last_mut() {
                    rows.push(row);
                }
            }
        }
    }
    Ok(sets)
}

fn procedure_output(mut sets: Vec<(Vec<String>, Vec<Row>)>) -> ProcedureOutput {
    // The trailing SELECT always yields the error message set.
    let error_message = sets
        .pop()
        .and_then(|(_, rows)| rows.into_iter().next())
        .and_then(|row| {
            let message = row.try_get::<&str, _>(0).ok().flatten().map(str::to_string);
            message
        })
        .filter(|message| !message.trim().is_empty());

    let (columns, rows) = match sets.into_iter().next() {
        Some((columns, rows)) => (
            columns,
            rows.iter()
                .map(|row| row.cells().map(|(_, data)| sql::cell_to_json(data)).collect())
                .collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };

    ProcedureOutput {
        columns,
        rows,
        error_message,
    }
}

async fn load_staging(conn: &mut Connection, table: &str, rows: &[StagingRow]) -> Result<u64, DbError> {
    conn.execute(format!("DELETE FROM {}", object_name(table)?), &[])
        .await
        .map_err(DbError::from_sql)?;

    let mut inserted = 0u64;
    for chunk in rows.chunks(STAGING_CHUNK) {
        let (insert_sql, params) = staging_insert(table, chunk)?;
        let refs = sql::as_dyn(&params);
        let result = conn
            .execute(insert_sql.as_str(), &refs)
            .await
            .map_err(DbError::from_sql)?;
        inserted += result.total();
    }
    Ok(inserted)
}

#[async_trait]
impl EcrituresGateway for SqlServerGateway {
    async fn search(&self, params: &SearchParams) -> Result<ProcedureOutput, DbError> {
        let batch = search_batch(&self.procedures.search)?;
        let start = Instant::now();

        let mut conn = self.pool.get().await?;
        let sets = collect_sets(&mut conn, &batch, &search_params(params)).await?;
        let output = procedure_output(sets);

        tracing::info!(
            "{} returned {} rows in {:?}",
            self.procedures.search,
            output.rows.len(),
            start.elapsed()
        );
        Ok(output)
    }

    async fn insert_fact(&self, fact: &FinancialFact) -> Result<(), DbError> {
        let statement = format!(
            "EXEC {} {}",
            object_name(&self.procedures.import_direct)?,
            sql::placeholders(1, 9)
        );
        let params = fact_params(fact);
        let refs = sql::as_dyn(&params);

        let mut conn = self.pool.get().await?;
        conn.execute(statement.as_str(), &refs)
            .await
            .map_err(DbError::from_sql)?;
        tracing::info!(
            "{}: fact recorded for period {}",
            self.procedures.import_direct,
            fact.periode_id
        );
        Ok(())
    }

    async fn insert_facts(&self, source: ImportSource, request: &FactsImport) -> Result<(), DbError> {
        let procedure = match source {
            ImportSource::Sage => &self.procedures.import_sage,
            ImportSource::Exact => &self.procedures.import_exact,
        };
        let statement = format!("EXEC {} {}", object_name(procedure)?, sql::placeholders(1, 7));
        let params = facts_import_params(request);
        let refs = sql::as_dyn(&params);
        let start = Instant::now();

        let mut conn = self.pool.get().await?;
        conn.execute(statement.as_str(), &refs)
            .await
            .map_err(DbError::from_sql)?;
        tracing::info!(
            "{} for company {} period {} done in {:?}",
            procedure,
            request.societe_id,
            request.periode_key,
            start.elapsed()
        );
        Ok(())
    }

    async fn replace_staging(&self, rows: &[StagingRow]) -> Result<u64, DbError> {
        let pool = self.pool.clone();
        let table = self.procedures.staging_table.clone();
        let rows = rows.to_vec();
        detached(async move { reload_staging(&pool, &table, &rows).await }).await
    }
}

/// Runs `task` on its own tokio task: dropping the caller's future (client
/// disconnect, timeout) cannot stop a transaction halfway.
async fn detached<T, F>(task: F) -> Result<T, DbError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, DbError>> + Send + 'static,
{
    tokio::spawn(task)
        .await
        .map_err(|e| DbError::Unavailable(format!("background task failed: {}", e)))?
}

async fn reload_staging(pool: &SqlPool, table: &str, rows: &[StagingRow]) -> Result<u64, DbError> {
    let start = Instant::now();
    let mut conn = pool.get().await?;

    conn.simple_query(STAGING_BEGIN)
        .await
        .map_err(DbError::from_sql)?
        .into_results()
        .await
        .map_err(DbError::from_sql)?;

    match load_staging(&mut conn, table, rows).await {
        Ok(inserted) => {
            conn.simple_query("COMMIT")
                .await
                .map_err(DbError::from_sql)?
                .into_results()
                .await
                .map_err(DbError::from_sql)?;
            tracing::info!("{}: {} rows loaded in {:?}", table, inserted, start.elapsed());
            Ok(inserted)
        }
        Err(e) => {
            tracing::error!("{}: load failed, rolling back: {}", table, e);
            if let Err(rollback) = conn.execute("IF @@TRANCOUNT > 0 ROLLBACK", &[]).await {
                tracing::error!("{}: rollback failed: {}", table, rollback);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_batch_reads_output_parameter() {
        let batch = search_batch("PS_S_000423_SelectRechercheEcriture_SRE").unwrap();
        assert!(batch.starts_with("DECLARE @MessageErreur NVARCHAR(4000);"));
        assert!(batch.contains(
            "EXEC PS_S_000423_SelectRechercheEcriture_SRE @P1, @P2, @P3, @P4, @P5, @P6, @P7, @P8, @P9, @MessageErreur OUTPUT;"
        ));
        assert!(batch.ends_with("SELECT @MessageErreur AS MessageErreur;"));
    }

    #[test]
    fn test_object_names_are_restricted() {
        assert!(search_batch("dbo.PS_Search").is_ok());
        assert!(search_batch("PS; DROP TABLE x").is_err());
        assert!(staging_insert("", &[]).is_err());
    }

    #[test]
    fn test_search_params_keep_call_order() {
        let params = search_params(&SearchParams {
            societe_id: Some(7),
            ..SearchParams::default()
        });
        assert_eq!(params.len(), 9);
        assert_eq!(params[2], SqlParam::Int(Some(7)));
        assert_eq!(params[0], SqlParam::Int(None));
        assert_eq!(params[4], SqlParam::Text(None));
    }

    #[test]
    fn test_facts_import_params_order() {
        let params = facts_import_params(&FactsImport {
            actualiser: true,
            societe_id: 3,
            stade_id: 2,
            periode_key: 202403,
            forcer: false,
            version_id: None,
            libelle: Some("Clôture".into()),
        });
        assert_eq!(
            params,
            vec![
                SqlParam::Bool(Some(true)),
                SqlParam::Int(Some(3)),
                SqlParam::Int(Some(2)),
                SqlParam::Int(Some(202403)),
                SqlParam::Bool(Some(false)),
                SqlParam::Int(None),
                SqlParam::Text(Some("Clôture".into())),
            ]
        );
    }

    #[test]
    fn test_staging_insert_numbers_placeholders_per_row() {
        let rows = vec![
            StagingRow::from_cells(&[Some("SOC01".into()), Some("2024".into())]),
            StagingRow::default(),
        ];
        let (sql, params) = staging_insert("T_W_ImportEcritures_IMP", &rows).unwrap();

        assert!(sql.starts_with("INSERT INTO T_W_ImportEcritures_IMP ([Societe], [Annee]"));
        assert!(sql.contains("[TypeValeur]) VALUES (@P1, "));
        assert!(sql.contains("@P24), (@P25, "));
        assert!(sql.ends_with("@P48)"));
        assert_eq!(params.len(), 48);
        assert_eq!(params[1], SqlParam::Text(Some("2024".into())));
        assert_eq!(params[24], SqlParam::Text(None));
    }

    #[test]
    fn test_staging_begin_resets_connection() {
        assert!(STAGING_BEGIN.starts_with("IF @@TRANCOUNT > 0 ROLLBACK;"));
        assert!(STAGING_BEGIN.contains("SET XACT_ABORT ON"));
        assert!(STAGING_BEGIN.ends_with("BEGIN TRANSACTION"));
    }

    #[tokio::test]
    async fn test_detached_work_outlives_cancelled_caller() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        let committed = Arc::new(AtomicBool::new(false));
        let flag = committed.clone();
        let caller = tokio::spawn(async move {
            detached(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, DbError>(1u64)
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(committed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_detached_reports_panics_as_unavailable() {
        let result = detached(async {
            let inserted: Vec<u64> = Vec::new();
            Ok::<u64, DbError>(inserted[0])
        })
        .await;
        assert!(matches!(result, Err(DbError::Unavailable(_))));
    }
}
