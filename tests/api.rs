use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use port_adhoc_compta::config::ApiUser;
use port_adhoc_compta::db::MemoryStore;
use port_adhoc_compta::models::LabelEntry;
use port_adhoc_compta::{router, AppConfig, AppState};

const ADMIN: &str = "Bearer admin-token";
const READER: &str = "Bearer reader-token";

fn app_with(store: Arc<MemoryStore>) -> Router {
    let mut config = AppConfig::default();
    config.auth.users = vec![
        ApiUser {
            username: "admin".into(),
            token: "admin-token".into(),
            superuser: true,
            permissions: vec![],
        },
        ApiUser {
            username: "lecteur".into(),
            token: "reader-token".into(),
            superuser: false,
            permissions: vec![],
        },
    ];
    router(AppState::in_memory(store, &config))
}

fn app() -> Router {
    app_with(Arc::new(MemoryStore::new()))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, token);
    }
    builder.body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_api_requires_token() {
    let app = app();
    let (status, body) = send(&app, get("/api/societes/", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));

    let (status, _) = send(&app, get("/api/societes/", Some("Bearer nope"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_list_and_sort_fallback() {
    let app = app();
    for (code, intitule) in [("PAC", "Port Adhoc"), ("ABC", "Abc Conseil")] {
        let (status, body) = send(
            &app,
            json_request("POST", "/api/societes/", ADMIN, json!({"code": code, "intitule": intitule})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
    }

    let (status, body) = send(&app, get("/api/societes/?ordering=-code", Some(READER))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(2));
    assert_eq!(body["results"][0]["code"], json!("PAC"));

    // unknown sort keys fall back to the default order
    let (_, body) = send(&app, get("/api/societes/?ordering=bogus", Some(READER))).await;
    assert_eq!(body["results"][0]["code"], json!("ABC"));

    let (_, body) = send(&app, get("/api/societes/?search=conseil", Some(READER))).await;
    assert_eq!(body["count"], json!(1));

    let (status, _) = send(
        &app,
        json_request("POST", "/api/societes/", ADMIN, json!({"code": "PAC", "intitule": "Doublon"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_missing_permission_is_forbidden() {
    let store = Arc::new(MemoryStore::new());
    let app = app_with(store);
    let (status, body) = send(
        &app,
        json_request("POST", "/api/societes/", READER, json!({"code": "PAC", "intitule": "Port Adhoc"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().unwrap().contains("comptabilite.add_societe"));

    let (_, body) = send(&app, get("/api/societes/", Some(READER))).await;
    assert_eq!(body["count"], json!(0));
}

#[tokio::test]
async fn test_unknown_slug_and_id() {
    let app = app();
    let (status, _) = send(&app, get("/api/inconnus/", Some(ADMIN))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get("/api/societes/42/", Some(ADMIN))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_index_falls_back_to_default_language() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed_labels(&[
            LabelEntry::new("fr", "model.societe.name_plural", "Entreprises", 1),
            LabelEntry::new("fr", "section.comptabilite", "Compta", 0),
        ])
        .unwrap();
    let app = app_with(store);

    let (status, body) = send(&app, get("/admin/?lang=de", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["language"], json!("fr"));

    let compta = &body["sections"][0];
    assert_eq!(compta["title"], json!("Compta"));
    assert_eq!(compta["models"][0]["model_name"], json!("societe"));
    assert_eq!(compta["models"][0]["name_plural"], json!("Entreprises"));
    assert_eq!(body["model_orders"]["societe"], json!(1));
}

#[tokio::test]
async fn test_list_page_reports_permissions() {
    let app = app();
    let (status, body) = send(&app, get("/societes/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can_add"], json!(false));
    assert_eq!(body["current_sort"], json!("code"));

    let (_, body) = send(&app, get("/societes/", Some(ADMIN))).await;
    assert_eq!(body["can_add"], json!(true));
}

#[tokio::test]
async fn test_search_without_filters_is_idle() {
    let app = app();
    let (status, body) = send(&app, get("/ecritures/recherche", Some(ADMIN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], json!("idle"));
    assert_eq!(body["rows"], json!([]));

    let (status, _) = send(&app, get("/ecritures/recherche?societe=1", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sage_import_rejects_month_thirteen() {
    let store = Arc::new(MemoryStore::new());
    let app = app_with(store.clone());
    let request = Request::post("/ecritures/import/sage")
        .header(header::AUTHORIZATION, ADMIN)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("mois=13&annee=2024&societe=3&stade=1&actualiser=on"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["message"], json!("month out of range"));
    assert!(store.calls().await.is_empty());
}

fn upload(filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "compta-boundary";
    let mut payload = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"fichier\"; filename=\"{f}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n",
        b = boundary,
        f = filename
    )
    .into_bytes();
    payload.extend_from_slice(content);
    payload.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::post("/ecritures/import/fichier")
        .header(header::AUTHORIZATION, ADMIN)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(payload))
        .unwrap()
}

#[tokio::test]
async fn test_file_import_rejects_wrong_extension() {
    let app = app();
    let boundary = "compta-boundary";
    let payload = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"fichier\"; filename=\"ecritures.csv\"\r\n\
         Content-Type: text/csv\r\n\r\ncompte,montant\r\n401000,12\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::post("/ecritures/import/fichier")
        .header(header::AUTHORIZATION, ADMIN)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(payload))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains(".xlsx"));
}

#[tokio::test]
async fn test_csv_template_download() {
    let response = app()
        .oneshot(get("/ecritures/import/modele.csv", Some(READER)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("modele_import_ecritures.csv"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"compte,libelle,montant"));
}

#[tokio::test]
async fn test_scope_company_links() {
    let app = app();
    let (status, _) = send(
        &app,
        json_request("POST", "/api/societes/", ADMIN, json!({"code": "PAC", "intitule": "Port Adhoc"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(
        &app,
        json_request("POST", "/api/perimetres/", ADMIN, json!({"id": 5, "code": "GRP", "libelle": "Groupe"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let link = || json_request("POST", "/api/perimetres/5/societes", ADMIN, json!({"societe": 1}));
    let (status, body) = send(&app, link()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], json!(true));
    let (status, body) = send(&app, link()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], json!(false));

    let (_, body) = send(&app, get("/api/perimetres/5/societes", Some(READER))).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["code"], json!("PAC"));

    let (status, _) = send(&app, get("/api/societes/1/societes", Some(READER))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let unlink = Request::delete("/api/perimetres/5/societes/1")
        .header(header::AUTHORIZATION, ADMIN)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, unlink).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, get("/perimetres/5/", Some(READER))).await;
    assert_eq!(body["societes"], json!([]));
}

#[tokio::test]
async fn test_sage_import_unknown_source_is_json_failure() {
    let store = Arc::new(MemoryStore::new());
    let app = app_with(store.clone());
    let request = Request::post("/ecritures/import/sage")
        .header(header::AUTHORIZATION, ADMIN)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("mois=1&annee=2024&societe=3&stade=1&import_type=cegid"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert!(status.is_client_error());
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].as_str().unwrap().contains("cegid"));
    assert!(store.calls().await.is_empty());
}

#[tokio::test]
async fn test_direct_import_wrong_content_type_is_json_failure() {
    let app = app();
    let request = json_request(
        "POST",
        "/ecritures/import",
        ADMIN,
        json!({"periode": "1", "societe": "2", "version": "3", "type_valeur": "4"}),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_file_import_without_multipart_is_json_failure() {
    let app = app();
    let request = Request::post("/ecritures/import/fichier")
        .header(header::AUTHORIZATION, ADMIN)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("pas un classeur"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert!(status.is_client_error());
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_search_with_repeated_filter_reports_failure() {
    let app = app();
    let (status, body) = send(
        &app,
        get("/ecritures/recherche?societe=7&societe=8", Some(ADMIN)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["phase"], json!("failed"));
    assert_eq!(body["rows"], json!([]));
    assert!(body["error"].as_str().unwrap().contains("societe"));
}

#[tokio::test]
async fn test_file_import_replaces_staging_rows() {
    let store = Arc::new(MemoryStore::new());
    let app = app_with(store.clone());

    let first = include_bytes!("fixtures/ecritures_trois_lignes.xlsx");
    let (status, body) = send(&app, upload("ecritures_trois_lignes.xlsx", first)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["rows"], json!(3));

    let rows = store.staging_rows().await;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get("Societe"), Some("SOC01"));
    assert_eq!(rows[0].values[1].as_deref(), Some("2024"));
    assert_eq!(rows[2].values[23].as_deref(), Some("r3c24"));
    assert!(rows
        .iter()
        .flat_map(|row| row.values.iter().flatten())
        .all(|cell| !cell.ends_with("c25") && !cell.ends_with("c30")));

    let second = include_bytes!("fixtures/ecritures_une_ligne.xlsx");
    let (status, body) = send(&app, upload("ecritures_une_ligne.xlsx", second)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["rows"], json!(1));

    let rows = store.staging_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("Societe"), Some("SOC09"));
    assert_eq!(rows[0].values[23].as_deref(), Some("r9c24"));
}

#[tokio::test]
async fn test_list_page_drops_unrecognized_boolean_filter() {
    let app = app();
    let (status, body) = send(&app, get("/societes/?groupe=peut-etre&archive=non", Some(ADMIN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filters"], json!({"archive": "non"}));

    let (status, body) = send(&app, get("/api/societes/?groupe=peut-etre", Some(ADMIN))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
}
