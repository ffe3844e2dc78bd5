//! CRUD over the reference entities, shared by pages and the REST API.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::auth::Principal;
use crate::db::{ListQuery, Repository, SortKey};
use crate::error::AppError;
use crate::models::{
    Capability, EntityMeta, FieldKind, IdPolicy, PerimetreSociete, Record, PERIMETRE_CONSO,
    SOCIETE,
};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 200;

/// A parsed list request plus what the page echoes back.
#[derive(Debug, Clone)]
pub struct ListRequest {
    pub query: ListQuery,
    pub page: u64,
    pub page_size: u64,
    pub search: Option<String>,
    pub filters: BTreeMap<String, String>,
    pub current_sort: &'static str,
    pub descending: bool,
}

impl ListRequest {
    pub fn current_order(&self) -> &'static str {
        if self.descending {
            "desc"
        } else {
            "asc"
        }
    }

    pub fn next_order(&self) -> &'static str {
        if self.descending {
            "asc"
        } else {
            "desc"
        }
    }

    /// Parse `search`, declared filters, `ordering` (`-field`) or
    /// `sort`/`order`, `page` and `page_size`. Invalid filter values are
    /// rejected.
    pub fn from_params(meta: &'static EntityMeta, params: &HashMap<String, String>) -> Result<Self, AppError> {
        Self::parse(meta, params, false)
    }

    /// Same as [`ListRequest::from_params`], but a filter value the list page
    /// does not recognize is dropped instead of failing the page.
    pub fn for_page(meta: &'static EntityMeta, params: &HashMap<String, String>) -> Result<Self, AppError> {
        Self::parse(meta, params, true)
    }

    fn parse(
        meta: &'static EntityMeta,
        params: &HashMap<String, String>,
        lenient: bool,
    ) -> Result<Self, AppError> {
        let search = params
            .get("search")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let mut filters = Vec::new();
        let mut echo = BTreeMap::new();
        for name in meta.filters {
            let Some(raw) = params.get(*name).map(|s| s.trim()).filter(|s| !s.is_empty()) else {
                continue;
            };
            let field = meta
                .field(name)
                .ok_or_else(|| AppError::Validation(format!("unknown filter {}", name)))?;
            let value = match filter_value(field.name, field.kind, raw) {
                Ok(value) => value,
                Err(e) if lenient => {
                    tracing::debug!("{}: ignoring filter: {}", meta.model_name, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            filters.push((*name, value));
            echo.insert(name.to_string(), raw.to_string());
        }

        let sort = sort_keys(meta, params);
        let (current_sort, descending) = sort
            .first()
            .map(|key| (key.field, key.descending))
            .unwrap_or((meta.id_field().name, false));

        let page = parse_positive(params.get("page"), "page")?.unwrap_or(1);
        let page_size = parse_positive(params.get("page_size"), "page_size")?
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);

        Ok(Self {
            query: ListQuery {
                search: search.clone(),
                filters,
                sort,
                offset: (page - 1).saturating_mul(page_size),
                limit: Some(page_size),
            },
            page,
            page_size,
            search,
            filters: echo,
            current_sort,
            descending,
        })
    }
}

fn filter_value(name: &str, kind: FieldKind, raw: &str) -> Result<Value, AppError> {
    let invalid = || AppError::Validation(format!("{}: invalid filter value '{}'", name, raw));
    match kind {
        FieldKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "oui" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "non" | "no" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        FieldKind::Int => raw.parse::<i64>().map(Value::from).map_err(|_| invalid()),
        FieldKind::Text | FieldKind::DateTime => Ok(Value::String(raw.to_string())),
    }
}

fn parse_positive(raw: Option<&String>, name: &str) -> Result<Option<u64>, AppError> {
    match raw.map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => match s.parse::<u64>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(AppError::Validation(format!("{} must be a positive integer", name))),
        },
    }
}

/// Unknown or non-sortable columns fall back to the default sort.
fn sort_keys(meta: &'static EntityMeta, params: &HashMap<String, String>) -> Vec<SortKey> {
    let requested = if let Some(ordering) = params.get("ordering") {
        let (field, descending) = match ordering.trim().strip_prefix('-') {
            Some(field) => (field, true),
            None => (ordering.trim(), false),
        };
        Some((field.to_string(), descending))
    } else {
        params.get("sort").map(|field| {
            let descending = params
                .get("order")
                .map_or(false, |o| o.eq_ignore_ascii_case("desc"));
            (field.trim().to_string(), descending)
        })
    };

    if let Some((field, descending)) = requested {
        if let Some(name) = meta.sortable.iter().copied().find(|s| *s == field) {
            return vec![SortKey { field: name, descending }];
        }
        tracing::debug!("{}: unknown sort '{}', using default", meta.model_name, field);
    }

    meta.default_sort
        .iter()
        .map(|field| SortKey {
            field: *field,
            descending: false,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub items: Vec<Record>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub num_pages: u64,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Entity operations with permission checks and reference resolution.
#[derive(Clone)]
pub struct EntityService {
    repo: Arc<dyn Repository>,
}

impl EntityService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn list(&self, meta: &'static EntityMeta, request: &ListRequest) -> Result<Page, AppError> {
        let rows = self.repo.list(meta, &request.query).await?;
        let num_pages = rows.total.div_ceil(request.page_size).max(1);
        Ok(Page {
            items: rows.rows,
            total: rows.total,
            page: request.page,
            page_size: request.page_size,
            num_pages,
            has_next: request.page < num_pages,
            has_previous: request.page > 1,
        })
    }

    pub async fn get(&self, meta: &'static EntityMeta, id: i64) -> Result<Record, AppError> {
        self.repo
            .get(meta, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", meta.verbose_name, id)))
    }

    pub async fn create(
        &self,
        principal: &Principal,
        meta: &'static EntityMeta,
        payload: Value,
    ) -> Result<Record, AppError> {
        principal.require(meta, Capability::Add)?;

        let mut record = (meta.normalize)(payload)?;
        meta.validate(&record)?;
        if meta.id_policy == IdPolicy::Supplied
            && record.get(meta.id_field().name).map_or(true, Value::is_null)
        {
            return Err(AppError::Validation(format!(
                "{}: this field is required",
                meta.id_field().name
            )));
        }
        self.resolve_references(meta, &mut record).await?;

        let id = self.repo.insert(meta, record).await?;
        tracing::info!("{} created {} {}", principal.username, meta.model_name, id);
        self.get(meta, id).await
    }

    pub async fn update(
        &self,
        principal: &Principal,
        meta: &'static EntityMeta,
        id: i64,
        payload: Value,
    ) -> Result<Record, AppError> {
        principal.require(meta, Capability::Change)?;

        let mut payload = match payload {
            Value::Object(map) => map,
            _ => return Err(AppError::Validation("expected a JSON object".to_string())),
        };
        payload.insert(meta.id_field().name.to_string(), json!(id));

        let mut record = (meta.normalize)(Value::Object(payload))?;
        meta.validate(&record)?;
        self.resolve_references(meta, &mut record).await?;

        if !self.repo.update(meta, id, record).await? {
            return Err(AppError::NotFound(format!("{} {}", meta.verbose_name, id)));
        }
        tracing::info!("{} updated {} {}", principal.username, meta.model_name, id);
        self.get(meta, id).await
    }

    pub async fn delete(&self, principal: &Principal, meta: &'static EntityMeta, id: i64) -> Result<(), AppError> {
        principal.require(meta, Capability::Delete)?;
        if !self.repo.delete(meta, id).await? {
            return Err(AppError::NotFound(format!("{} {}", meta.verbose_name, id)));
        }
        tracing::info!("{} deleted {} {}", principal.username, meta.model_name, id);
        Ok(())
    }

    /// Absent optional references are cleared; identifiers that do not
    /// resolve are rejected.
    async fn resolve_references(&self, meta: &'static EntityMeta, record: &mut Record) -> Result<(), AppError> {
        for fk in meta.foreign_keys {
            let value = record.get(fk.field).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                if !fk.nullable {
                    return Err(AppError::Validation(format!("{}: this field is required", fk.field)));
                }
                record.insert(fk.field.to_string(), Value::Null);
                continue;
            }

            let id = value.as_i64().ok_or_else(|| {
                AppError::Validation(format!("{}: expected an identifier", fk.field))
            })?;
            if self.repo.get(fk.target, id).await?.is_none() {
                return Err(AppError::Validation(format!(
                    "{}: no {} with id {}",
                    fk.field, fk.target.verbose_name, id
                )));
            }
        }
        Ok(())
    }

    /// Row count for the admin index; failures count as zero.
    pub async fn count_or_zero(&self, meta: &'static EntityMeta) -> u64 {
        match self.repo.count(meta).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("count of {} failed: {}", meta.table, e);
                0
            }
        }
    }

    /// Companies attached to a consolidation scope.
    pub async fn scope_companies(&self, perimetre: i32) -> Result<Vec<Record>, AppError> {
        self.get(&PERIMETRE_CONSO, i64::from(perimetre)).await?;
        let ids = self.repo.scope_companies(perimetre).await?;

        let mut companies = Vec::with_capacity(ids.len());
        for id in ids {
            match self.repo.get(&SOCIETE, i64::from(id)).await? {
                Some(company) => companies.push(company),
                None => tracing::warn!("scope {} links missing company {}", perimetre, id),
            }
        }
        Ok(companies)
    }

    /// Returns `false` when the company was already linked.
    pub async fn link_company(&self, principal: &Principal, link: PerimetreSociete) -> Result<bool, AppError> {
        principal.require(&PERIMETRE_CONSO, Capability::Change)?;
        self.get(&PERIMETRE_CONSO, i64::from(link.perimetre)).await?;
        self.get(&SOCIETE, i64::from(link.societe)).await?;

        let created = self.repo.link_scope_company(link).await?;
        tracing::info!(
            "{} linked company {} to scope {} (new: {})",
            principal.username,
            link.societe,
            link.perimetre,
            created
        );
        Ok(created)
    }

    pub async fn unlink_company(&self, principal: &Principal, link: PerimetreSociete) -> Result<(), AppError> {
        principal.require(&PERIMETRE_CONSO, Capability::Change)?;
        if !self.repo.unlink_scope_company(link).await? {
            return Err(AppError::NotFound(format!(
                "link {} / {}",
                link.perimetre, link.societe
            )));
        }
        Ok(())
    }
}
