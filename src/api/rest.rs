//! REST resources: one collection/item pair per entity slug, plus the
//! consolidation scope company links.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::api::handlers::entity;
use crate::api::AppState;
use crate::auth::Principal;
use crate::error::AppError;
use crate::models::{PerimetreSociete, Record, PERIMETRE_CONSO};
use crate::service::ListRequest;

#[derive(Debug, Serialize)]
pub struct Collection {
    pub count: u64,
    pub page: u64,
    pub num_pages: u64,
    pub results: Vec<Record>,
}

fn path_id(raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("identifier {}", raw)))
}

pub async fn list(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    _principal: Principal,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Collection>, AppError> {
    let meta = entity(&slug)?;
    let request = ListRequest::from_params(meta, &params)?;
    let page = state.entities.list(meta, &request).await?;
    Ok(Json(Collection {
        count: page.total,
        page: page.page,
        num_pages: page.num_pages,
        results: page.items,
    }))
}

pub async fn create(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    let meta = entity(&slug)?;
    let record = state.entities.create(&principal, meta, payload).await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

pub async fn retrieve(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    _principal: Principal,
) -> Result<Json<Record>, AppError> {
    let meta = entity(&slug)?;
    Ok(Json(state.entities.get(meta, path_id(&id)?).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Json<Record>, AppError> {
    let meta = entity(&slug)?;
    let record = state
        .entities
        .update(&principal, meta, path_id(&id)?, payload)
        .await?;
    Ok(Json(record))
}

pub async fn destroy(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    principal: Principal,
) -> Result<StatusCode, AppError> {
    let meta = entity(&slug)?;
    state.entities.delete(&principal, meta, path_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Only consolidation scopes carry company links.
fn scope_id(slug: &str, raw: &str) -> Result<i32, AppError> {
    if slug != PERIMETRE_CONSO.slug {
        return Err(AppError::NotFound(format!("/api/{}/{}/societes", slug, raw)));
    }
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("identifier {}", raw)))
}

pub async fn scope_companies(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    _principal: Principal,
) -> Result<Json<Vec<Record>>, AppError> {
    let perimetre = scope_id(&slug, &id)?;
    Ok(Json(state.entities.scope_companies(perimetre).await?))
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub societe: i32,
}

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub success: bool,
    pub created: bool,
}

pub async fn link_company(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    principal: Principal,
    Json(body): Json<LinkRequest>,
) -> Result<Response, AppError> {
    let link = PerimetreSociete {
        perimetre: scope_id(&slug, &id)?,
        societe: body.societe,
    };
    let created = state.entities.link_company(&principal, link).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(LinkResponse { success: true, created })).into_response())
}

pub async fn unlink_company(
    State(state): State<AppState>,
    Path((slug, id, societe)): Path<(String, String, i32)>,
    principal: Principal,
) -> Result<StatusCode, AppError> {
    let link = PerimetreSociete {
        perimetre: scope_id(&slug, &id)?,
        societe,
    };
    state.entities.unlink_company(&principal, link).await?;
    Ok(StatusCode::NO_CONTENT)
}
