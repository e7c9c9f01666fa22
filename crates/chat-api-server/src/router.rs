use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use crate::auth::middleware::require_identity;
use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.settings.server.body_limit_mb * 1024 * 1024;

    // Public routes (no identity check)
    let public_routes: Router<AppState> = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route("/auth", post(handlers::auth::verify_token_handler));

    let mut protected_routes: Router<AppState> = Router::new()
        .route("/chat", post(handlers::chat::chat_handler))
        .route("/chat/stream", post(handlers::chat::chat_stream_handler))
        .route("/upload", post(handlers::upload::upload_handler))
        .route("/document/analyze", post(handlers::document::analyze_document_handler))
        .route("/export/pdf", post(handlers::export::export_pdf_handler))
        .route("/vision", post(handlers::vision::vision_handler));

    if state.settings.identity.protect_routes {
        info!("Bearer token required on protected routes");
        protected_routes =
            protected_routes.layer(middleware::from_fn_with_state(state.clone(), require_identity));
    }

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tests::{sign, test_verifier};
    use crate::config::LlmProvider;
    use crate::state::tests::test_settings;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "chatrelayboundary";
    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn offline_state(dir: &std::path::Path) -> AppState {
        AppState::build(test_settings(dir)).unwrap()
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// (field name, optional filename, content)
    fn multipart_post(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::post(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(offline_state(dir.path()));

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "Backend OK" }));
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(offline_state(dir.path()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["completion_provider"], "offline");
        assert_eq!(body["sessions"]["retention_bound"], 20);
    }

    #[tokio::test]
    async fn test_chat_records_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let state = offline_state(dir.path());
        let app = build_router(state.clone());

        let response = app
            .oneshot(json_post("/chat", json!({ "session_id": "s1", "message": "Bonjour !" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "response": "Bonjour, comment puis-je t’aider ?" })
        );

        let history = state.conversation_manager.store().snapshot("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "Bonjour !");
    }

    #[tokio::test]
    async fn test_chat_without_session_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = offline_state(dir.path());
        let app = build_router(state.clone());

        app.oneshot(json_post("/chat", json!({ "message": "salut" })))
            .await
            .unwrap();

        let history = state.conversation_manager.store().snapshot("default").await;
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_chat_failure_is_tagged_error_with_ok_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.llm.provider = LlmProvider::OpenAi;
        settings.llm.required = false;
        let state = AppState::build(settings).unwrap();
        let app = build_router(state.clone());

        let response = app
            .oneshot(json_post("/chat", json!({ "session_id": "s1", "message": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response"], Value::Null);
        assert_eq!(body["error"]["code"], "COMPLETION_NOT_CONFIGURED");

        let history = state.conversation_manager.store().snapshot("s1").await;
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_chat_stream_returns_plain_text_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let state = offline_state(dir.path());
        let app = build_router(state.clone());

        let response = app
            .oneshot(json_post("/chat/stream", json!({ "session_id": "s1", "message": "bonjour" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), "Bonjour, comment puis-je t’aider ?");

        let history = state.conversation_manager.store().snapshot("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Bonjour, comment puis-je t’aider ?");
    }

    #[tokio::test]
    async fn test_chat_stream_start_failure_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.llm.provider = LlmProvider::OpenAi;
        settings.llm.required = false;
        let app = build_router(AppState::build(settings).unwrap());

        let response = app
            .oneshot(json_post("/chat/stream", json!({ "message": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"]["code"], "COMPLETION_NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn test_upload_reports_supported_formats() {
        let dir = tempfile::tempdir().unwrap();
        let state = offline_state(dir.path());

        let response = build_router(state.clone())
            .oneshot(multipart_post("/upload", &[("file", Some("notes.txt"), b"hello world".as_slice())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["supported"], true);
        assert_eq!(body["format"], "text");
        assert_eq!(body["chars"], 11);
        let stored = body["file"].as_str().unwrap();
        assert!(stored.ends_with("_notes.txt"));
        assert_eq!(std::fs::read(stored).unwrap(), b"hello world");

        let response = build_router(state)
            .oneshot(multipart_post("/upload", &[("file", Some("photo.heic"), b"\0\0\0\x18ftyp".as_slice())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["supported"], false);
        assert!(body.get("format").is_none());
    }

    #[tokio::test]
    async fn test_upload_of_unreadable_pdf_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(offline_state(dir.path()));

        let response = app
            .oneshot(multipart_post("/upload", &[("file", Some("scan.pdf"), b"not really a pdf".as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["supported"], false);
        assert_eq!(body["format"], "pdf");
        assert!(body["extraction_error"].is_string());

        let stored = body["file"].as_str().unwrap();
        assert_eq!(std::fs::read(stored).unwrap(), b"not really a pdf");
        assert_eq!(std::fs::read_dir(dir.path().join("uploads")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_upload_without_file_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(offline_state(dir.path()));

        let response = app
            .oneshot(multipart_post("/upload", &[("note", None, b"no file here".as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "BadRequest");
    }

    #[tokio::test]
    async fn test_analyze_document_goes_through_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = offline_state(dir.path());

        let response = build_router(state.clone())
            .oneshot(multipart_post(
                "/document/analyze",
                &[
                    ("session_id", None, b"docs".as_slice()),
                    ("question", None, b"Summarize".as_slice()),
                    ("file", Some("report.txt"), b"Quarterly numbers".as_slice()),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["response"],
            "Réponse IA : Summarize\n\nQuarterly numbers"
        );
        assert_eq!(state.conversation_manager.store().snapshot("docs").await.len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_document_cuts_to_char_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.documents.char_budget = 5;
        let app = build_router(AppState::build(settings).unwrap());

        let response = app
            .oneshot(multipart_post(
                "/document/analyze",
                &[
                    ("question", None, b"Q".as_slice()),
                    ("file", Some("long.txt"), b"abcdefghij".as_slice()),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["response"], "Réponse IA : Q\n\nabcde");
    }

    #[tokio::test]
    async fn test_analyze_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(offline_state(dir.path()));

        let response = app
            .oneshot(multipart_post("/document/analyze", &[("file", Some("sheet.xlsx"), b"PK\x03\x04".as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response"], Value::Null);
        assert_eq!(body["error"]["code"], "UNSUPPORTED_FORMAT");
    }

    #[tokio::test]
    async fn test_export_pdf_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(offline_state(dir.path()));

        let response = app
            .oneshot(Request::post("/export/pdf?text=Hello%20PDF").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let file = body["file"].as_str().unwrap();
        assert!(file.ends_with(".pdf"));
        assert!(std::fs::read(file).unwrap().starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_vision_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let state = offline_state(dir.path());

        let response = build_router(state.clone())
            .oneshot(multipart_post("/vision", &[("image", Some("cat.png"), PNG_HEADER)]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["response"],
            "Réponse IA : Describe this image in detail."
        );
        assert_eq!(state.conversation_manager.store().stats().active_sessions, 0);
    }

    #[tokio::test]
    async fn test_vision_rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(offline_state(dir.path()));

        let response = app
            .oneshot(multipart_post("/vision", &[("file", Some("notes.txt"), b"plain text".as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_auth_without_verifier_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(offline_state(dir.path()));

        let response = app
            .oneshot(Request::post("/auth?token=abc").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_auth_verifies_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = offline_state(dir.path());
        state.identity = Some(Arc::new(test_verifier("demo-project")));

        let token = sign("demo-project", "uid-42", "k1", 3600);
        let response = build_router(state.clone())
            .oneshot(
                Request::post(format!("/auth?token={}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "uid": "uid-42" }));

        let response = build_router(state)
            .oneshot(Request::post("/auth?token=garbage").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_routes_require_bearer_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.identity.protect_routes = true;
        let mut state = AppState::build(settings).unwrap();
        state.identity = Some(Arc::new(test_verifier("demo-project")));

        let response = build_router(state.clone())
            .oneshot(json_post("/chat", json!({ "message": "hi" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let token = sign("demo-project", "uid-42", "k1", 3600);
        let mut request = json_post("/chat", json!({ "message": "hi" }));
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Public routes stay open
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
