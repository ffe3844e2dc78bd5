//! Écritures search and import endpoints.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{FormRejection, QueryRejection},
        Form, Json, Multipart, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::api::AppState;
use crate::auth::Principal;
use crate::models::{DirectImportForm, ImportResult, SageImportForm, SearchCriteria, SearchOutcome};
use crate::service::spreadsheet::{self, TEMPLATE_FILENAME};

const UPLOAD_FIELD: &str = "fichier";

fn import_response(result: ImportResult) -> Response {
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(result)).into_response()
}

/// Undecodable import input keeps the extractor's status but answers with an `ImportResult`.
fn rejected_import(status: StatusCode, message: String) -> Response {
    tracing::warn!("import rejected: {}", message);
    (status, Json(ImportResult::failure(message))).into_response()
}

fn rejected_search(status: StatusCode, message: String) -> Response {
    tracing::warn!("search rejected: {}", message);
    (status, Json(SearchOutcome::failed(message))).into_response()
}

pub async fn search_query(
    State(state): State<AppState>,
    _principal: Principal,
    criteria: Result<Query<SearchCriteria>, QueryRejection>,
) -> Response {
    match criteria {
        Ok(Query(criteria)) => Json(state.ecritures.search(&criteria).await).into_response(),
        Err(rejection) => rejected_search(rejection.status(), rejection.body_text()),
    }
}

pub async fn search_form(
    State(state): State<AppState>,
    _principal: Principal,
    criteria: Result<Form<SearchCriteria>, FormRejection>,
) -> Response {
    match criteria {
        Ok(Form(criteria)) => Json(state.ecritures.search(&criteria).await).into_response(),
        Err(rejection) => rejected_search(rejection.status(), rejection.body_text()),
    }
}

pub async fn import_direct(
    State(state): State<AppState>,
    principal: Principal,
    form: Result<Form<DirectImportForm>, FormRejection>,
) -> Response {
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => return rejected_import(rejection.status(), rejection.body_text()),
    };
    tracing::info!("direct import requested by {}", principal.username);
    import_response(state.ecritures.import_direct(&form).await)
}

pub async fn import_sage(
    State(state): State<AppState>,
    principal: Principal,
    form: Result<Form<SageImportForm>, FormRejection>,
) -> Response {
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => return rejected_import(rejection.status(), rejection.body_text()),
    };
    tracing::info!("facts import requested by {}", principal.username);
    import_response(state.ecritures.import_facts(&form).await)
}

/// Multipart upload; the workbook travels in the `fichier` field.
pub async fn import_file(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => return rejected_import(rejection.status(), rejection.body_text()),
    };
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("malformed upload from {}: {}", principal.username, e);
                return import_response(ImportResult::failure(format!("malformed upload: {}", e)));
            }
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                return import_response(ImportResult::failure(format!("cannot read upload: {}", e)))
            }
        };
        tracing::info!(
            "file import of {} ({} bytes) requested by {}",
            filename,
            bytes.len(),
            principal.username
        );
        return import_response(state.ecritures.import_file(&filename, bytes).await);
    }

    import_response(ImportResult::failure("no file was uploaded"))
}

pub async fn import_template(_principal: Principal) -> Response {
    match spreadsheet::import_template() {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", TEMPLATE_FILENAME),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
