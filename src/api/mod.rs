pub mod ecritures;
pub mod handlers;
pub mod rest;

use axum::{
    extract::{DefaultBodyLimit, Query, Request, State},
    http::header::ACCEPT_LANGUAGE,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth::Authenticator;
use crate::config::AppConfig;
use crate::db::{EcrituresGateway, LabelStore, MemoryStore, Repository};
use crate::service::labels::pick_language;
use crate::service::{EcrituresService, EntityService, LabelContext, LabelResolver};

pub use handlers::health_check;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub entities: EntityService,
    pub ecritures: EcrituresService,
    pub labels: LabelResolver,
    pub auth: Arc<Authenticator>,
    pub upload_limit: usize,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn Repository>,
        label_store: Arc<dyn LabelStore>,
        gateway: Arc<dyn EcrituresGateway>,
        config: &AppConfig,
    ) -> Self {
        Self {
            entities: EntityService::new(repo),
            ecritures: EcrituresService::new(gateway),
            labels: LabelResolver::new(label_store, config.labels.default_language.clone()),
            auth: Arc::new(Authenticator::new(config.auth.users.clone())),
            upload_limit: config.upload.max_bytes,
        }
    }

    /// Every seam backed by the same in-process store.
    pub fn in_memory(store: Arc<MemoryStore>, config: &AppConfig) -> Self {
        Self::new(store.clone(), store.clone(), store, config)
    }
}

/// Resolve the request language once and attach its labels.
async fn attach_labels(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let language = {
        let query_lang = Query::<HashMap<String, String>>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(params)| params.get("lang").cloned());
        let accept = request
            .headers()
            .get(ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok());
        pick_language(query_lang.as_deref(), accept, state.labels.default_language())
    };

    let labels = state.labels.resolve_or_empty(&language).await;
    request.extensions_mut().insert(LabelContext::new(labels));
    next.run(request).await
}

pub fn router(state: AppState) -> Router {
    let pages = Router::new()
        .route("/", get(handlers::home))
        .route("/admin/", get(handlers::admin_index))
        .route("/:slug/", get(handlers::list_page).post(handlers::create_page))
        .route(
            "/:slug/:id/",
            get(handlers::detail_page)
                .put(handlers::update_page)
                .delete(handlers::delete_page),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), attach_labels));

    let api = Router::new()
        .route("/api/:slug/", get(rest::list).post(rest::create))
        .route(
            "/api/:slug/:id/",
            get(rest::retrieve).put(rest::update).delete(rest::destroy),
        )
        .route(
            "/api/:slug/:id/societes",
            get(rest::scope_companies).post(rest::link_company),
        )
        .route(
            "/api/:slug/:id/societes/:societe_id",
            axum::routing::delete(rest::unlink_company),
        );

    let ecritures = Router::new()
        .route(
            "/ecritures/recherche",
            get(ecritures::search_query).post(ecritures::search_form),
        )
        .route("/ecritures/import", post(ecritures::import_direct))
        .route("/ecritures/import/sage", post(ecritures::import_sage))
        .route(
            "/ecritures/import/fichier",
            post(ecritures::import_file).layer(DefaultBodyLimit::max(state.upload_limit)),
        )
        .route("/ecritures/import/modele.csv", get(ecritures::import_template));

    Router::new()
        .route("/health", get(health_check))
        .merge(pages)
        .merge(api)
        .merge(ecritures)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
