//! Page endpoints: the JSON context the HTML templates are rendered from.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::api::AppState;
use crate::auth::{MaybePrincipal, Principal};
use crate::error::AppError;
use crate::models::{
    entity_by_slug, Capability, EntityMeta, Record, ENTITIES, PERIMETRE_CONSO,
    PLAN_COMPTE_LOCAL, SECTIONS, SOCIETE,
};
use crate::service::{LabelContext, ListRequest, Page};

pub const SITE_TITLE: &str = "Port Adhoc Compta - Gestion Comptable";

/// Health check
pub async fn health_check() -> &'static str {
    "OK"
}

pub fn entity(slug: &str) -> Result<&'static EntityMeta, AppError> {
    entity_by_slug(slug).ok_or_else(|| AppError::NotFound(format!("page /{}/", slug)))
}

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("identifier {}", raw)))
}

/// Row plus its display string.
fn with_display(meta: &EntityMeta, mut record: Record) -> Record {
    let display = (meta.describe)(&record);
    record.insert("display".to_string(), Value::String(display));
    record
}

#[derive(Debug, Serialize)]
pub struct Permissions {
    pub can_add: bool,
    pub can_change: bool,
    pub can_delete: bool,
}

impl Permissions {
    fn for_principal(principal: Option<&Principal>, meta: &EntityMeta) -> Self {
        let can = |capability| principal.map_or(false, |p| p.can(meta, capability));
        Self {
            can_add: can(Capability::Add),
            can_change: can(Capability::Change),
            can_delete: can(Capability::Delete),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HomePage {
    pub title: &'static str,
    pub societes_count: u64,
    pub comptes_count: u64,
    pub labels: Map<String, Value>,
}

pub async fn home(State(state): State<AppState>, Extension(labels): Extension<LabelContext>) -> Json<HomePage> {
    let (societes_count, comptes_count) = tokio::join!(
        state.entities.count_or_zero(&SOCIETE),
        state.entities.count_or_zero(&PLAN_COMPTE_LOCAL)
    );
    Json(HomePage {
        title: SITE_TITLE,
        societes_count,
        comptes_count,
        labels: labels.labels().template_context(),
    })
}

#[derive(Debug, Serialize)]
pub struct AdminModel {
    pub model_name: &'static str,
    pub slug: &'static str,
    pub name: String,
    pub name_plural: String,
    pub count: u64,
    pub order: i32,
}

#[derive(Debug, Serialize)]
pub struct AdminSection {
    pub app_label: &'static str,
    pub title: String,
    pub models: Vec<AdminModel>,
}

#[derive(Debug, Serialize)]
pub struct AdminIndex {
    pub language: String,
    pub sections: Vec<AdminSection>,
    pub model_orders: BTreeMap<String, i32>,
    pub labels: Map<String, Value>,
}

/// Sections with localized names, row counts and label-driven order.
pub async fn admin_index(
    State(state): State<AppState>,
    Extension(labels): Extension<LabelContext>,
) -> Json<AdminIndex> {
    let counts = join_all(ENTITIES.iter().map(|meta| state.entities.count_or_zero(*meta))).await;

    let sections = SECTIONS
        .iter()
        .map(|(app_label, _)| {
            let mut models: Vec<AdminModel> = ENTITIES
                .iter()
                .zip(&counts)
                .filter(|(meta, _)| meta.app_label == *app_label)
                .map(|(meta, count)| {
                    let names = labels.display_names(*meta);
                    AdminModel {
                        model_name: meta.model_name,
                        slug: meta.slug,
                        name: names.singular,
                        name_plural: names.plural,
                        count: *count,
                        order: labels.labels().model_order(meta.model_name),
                    }
                })
                .collect();
            models.sort_by_key(|model| model.order);
            AdminSection {
                app_label: *app_label,
                title: labels.section_title(app_label),
                models,
            }
        })
        .collect();

    Json(AdminIndex {
        language: labels.language().to_string(),
        sections,
        model_orders: labels.labels().model_orders().clone(),
        labels: labels.labels().template_context(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListPage {
    pub title: String,
    pub entity: &'static str,
    pub slug: &'static str,
    #[serde(flatten)]
    pub page: Page,
    pub search: Option<String>,
    pub filters: BTreeMap<String, String>,
    pub current_sort: &'static str,
    pub current_order: &'static str,
    pub next_order: &'static str,
    #[serde(flatten)]
    pub permissions: Permissions,
}

pub async fn list_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    MaybePrincipal(principal): MaybePrincipal,
    Extension(labels): Extension<LabelContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListPage>, AppError> {
    let meta = entity(&slug)?;
    let request = ListRequest::for_page(meta, &params)?;
    let mut page = state.entities.list(meta, &request).await?;
    page.items = page
        .items
        .into_iter()
        .map(|record| with_display(meta, record))
        .collect();

    Ok(Json(ListPage {
        title: labels.display_names(meta).plural,
        entity: meta.model_name,
        slug: meta.slug,
        page,
        search: request.search.clone(),
        filters: request.filters.clone(),
        current_sort: request.current_sort,
        current_order: request.current_order(),
        next_order: request.next_order(),
        permissions: Permissions::for_principal(principal.as_ref(), meta),
    }))
}

#[derive(Debug, Serialize)]
pub struct DetailPage {
    pub title: String,
    pub entity: &'static str,
    pub item: Record,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub societes: Option<Vec<Record>>,
    #[serde(flatten)]
    pub permissions: Permissions,
}

pub async fn detail_page(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    MaybePrincipal(principal): MaybePrincipal,
    Extension(labels): Extension<LabelContext>,
) -> Result<Json<DetailPage>, AppError> {
    let meta = entity(&slug)?;
    let id = parse_id(&id)?;
    let item = with_display(meta, state.entities.get(meta, id).await?);

    let societes = if std::ptr::eq(meta, &PERIMETRE_CONSO) {
        let perimetre =
            i32::try_from(id).map_err(|_| AppError::NotFound(format!("identifier {}", id)))?;
        let companies = state.entities.scope_companies(perimetre).await?;
        Some(
            companies
                .into_iter()
                .map(|company| with_display(&SOCIETE, company))
                .collect(),
        )
    } else {
        None
    };

    Ok(Json(DetailPage {
        title: labels.display_names(meta).singular,
        entity: meta.model_name,
        item,
        societes,
        permissions: Permissions::for_principal(principal.as_ref(), meta),
    }))
}

pub async fn create_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    let meta = entity(&slug)?;
    let record = state.entities.create(&principal, meta, payload).await?;
    Ok((StatusCode::CREATED, Json(with_display(meta, record))).into_response())
}

pub async fn update_page(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    principal: Principal,
    Json(payload): Json<Value>,
) -> Result<Json<Record>, AppError> {
    let meta = entity(&slug)?;
    let record = state
        .entities
        .update(&principal, meta, parse_id(&id)?, payload)
        .await?;
    Ok(Json(with_display(meta, record)))
}

pub async fn delete_page(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    principal: Principal,
) -> Result<StatusCode, AppError> {
    let meta = entity(&slug)?;
    state
        .entities
        .delete(&principal, meta, parse_id(&id)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
