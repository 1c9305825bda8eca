//! HTTP API: connection status, send endpoints, and chat history.
//!
//! Every route except `/media` requires `Authorization: Bearer <api_key>`
//! when a key is configured.

use crate::gateway::{Gateway, Origin, Upload};
use axum::{
    extract::{multipart::Multipart, rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};
use wabridge_channels::generate_qr_image;
use wabridge_core::{config::ApiConfig, error::BridgeError, message::ConversationId};

/// Uploads go through the same body limit.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, ApiError>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    gateway: Arc<Gateway>,
    api_key: Option<String>,
    media_dir: PathBuf,
}

impl ApiState {
    pub fn new(gateway: Arc<Gateway>, api_key: &str, media_dir: PathBuf) -> Self {
        Self {
            gateway,
            api_key: (!api_key.is_empty()).then(|| api_key.to_string()),
            media_dir,
        }
    }
}

/// Accepts `true`, `"true"`, `"1"`, `1`; anything else is `false`.
fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::String(s) => truthy(&s),
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    })
}

fn truthy(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[derive(Debug, Deserialize)]
struct SendTextRequest {
    number: String,
    message: String,
    #[serde(default, deserialize_with = "flag")]
    is_ai_reply: bool,
    pushname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendImageRequest {
    number: String,
    image_url: String,
    caption: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    is_ai_reply: bool,
    pushname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendDocumentRequest {
    number: String,
    document_url: String,
    file_name: Option<String>,
    mimetype: Option<String>,
    caption: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    is_ai_reply: bool,
    pushname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypingRequest {
    number: String,
}

#[derive(Debug, Deserialize)]
struct ReadRequest {
    #[serde(rename = "remoteJid")]
    remote_jid: String,
    #[serde(rename = "messageId")]
    message_id: String,
}

/// Constant-time string comparison to prevent timing attacks on API token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Returns `Err` with a 401 response when the bearer token is missing or wrong.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Result<(), ApiError> {
    let Some(key) = api_key else {
        return Ok(());
    };
    let unauthorized = |msg: &str| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "error", "error": msg})),
        )
    };

    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| unauthorized("missing Authorization header"))?
        .to_str()
        .map_err(|_| unauthorized("invalid Authorization header"))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => Ok(()),
        _ => Err(unauthorized("invalid token")),
    }
}

fn error_response(e: BridgeError) -> ApiError {
    let status = match &e {
        BridgeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        BridgeError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
        error!("request failed: {e}");
    }
    (status, Json(json!({"status": "error", "error": e.to_string()})))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| error_response(BridgeError::InvalidRequest(e.body_text())))
}

fn sent(message_id: String) -> Json<Value> {
    Json(json!({"status": "success", "messageId": message_id}))
}

/// `GET /status`
async fn status(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    check_auth(&headers, &state.api_key)?;

    let report = state.gateway.supervisor().state().report();
    let qr_png = match report.qr.as_deref().map(generate_qr_image) {
        Some(Ok(png)) => Some(BASE64.encode(png)),
        Some(Err(e)) => {
            warn!("failed to render QR: {e}");
            None
        }
        None => None,
    };

    Ok(Json(json!({
        "status": report.status,
        "number": report.number,
        "qr": report.qr,
        "qr_png_base64": qr_png,
    })))
}

/// `GET /qr.png`: the current pairing challenge, 404 when there is none.
async fn qr_png(headers: HeaderMap, State(state): State<ApiState>) -> Result<Response, ApiError> {
    check_auth(&headers, &state.api_key)?;

    let Some(qr) = state.gateway.supervisor().state().qr().map(str::to_string) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "error": "no QR code pending"})),
        ));
    };
    let png = generate_qr_image(&qr).map_err(error_response)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// `POST /disconnect`: log out, erase credentials, restart pairing.
async fn disconnect(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    state
        .gateway
        .supervisor()
        .logout()
        .await
        .map_err(error_response)?;
    Ok(Json(json!({"success": true})))
}

/// `POST /send-text`
async fn send_text(
    headers: HeaderMap,
    State(state): State<ApiState>,
    payload: Result<Json<SendTextRequest>, JsonRejection>,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let req = body(payload)?;
    let origin = Origin::from_request(req.is_ai_reply, req.pushname);
    state
        .gateway
        .send_text(&req.number, &req.message, &origin)
        .await
        .map(sent)
        .map_err(error_response)
}

/// `POST /send-text-ai`: always automated.
async fn send_text_ai(
    headers: HeaderMap,
    State(state): State<ApiState>,
    payload: Result<Json<SendTextRequest>, JsonRejection>,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let req = body(payload)?;
    let origin = Origin::from_request(true, req.pushname);
    state
        .gateway
        .send_text(&req.number, &req.message, &origin)
        .await
        .map(sent)
        .map_err(error_response)
}

/// `POST /send-image`
async fn send_image(
    headers: HeaderMap,
    State(state): State<ApiState>,
    payload: Result<Json<SendImageRequest>, JsonRejection>,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let req = body(payload)?;
    let origin = Origin::from_request(req.is_ai_reply, req.pushname);
    state
        .gateway
        .send_image_url(&req.number, &req.image_url, req.caption.as_deref(), &origin)
        .await
        .map(sent)
        .map_err(error_response)
}

/// `POST /send-document`
async fn send_document(
    headers: HeaderMap,
    State(state): State<ApiState>,
    payload: Result<Json<SendDocumentRequest>, JsonRejection>,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let req = body(payload)?;
    let origin = Origin::from_request(req.is_ai_reply, req.pushname);
    state
        .gateway
        .send_document_url(
            &req.number,
            &req.document_url,
            req.file_name.as_deref(),
            req.mimetype.as_deref(),
            req.caption.as_deref(),
            &origin,
        )
        .await
        .map(sent)
        .map_err(error_response)
}

/// Multipart send form: one file field plus text fields.
#[derive(Default)]
struct UploadForm {
    number: String,
    caption: Option<String>,
    pushname: Option<String>,
    is_ai_reply: bool,
    file: Option<Upload>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart, file_field: &str) -> Result<Self, BridgeError> {
        let bad = |e: axum::extract::multipart::MultipartError| {
            BridgeError::InvalidRequest(format!("invalid multipart body: {e}"))
        };
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(bad)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == file_field {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let mimetype = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(bad)?.to_vec();
                form.file = Some(Upload {
                    file_name,
                    mimetype,
                    bytes,
                });
                continue;
            }

            let value = field.text().await.map_err(bad)?;
            match name.as_str() {
                "number" => form.number = value,
                "caption" => form.caption = Some(value),
                "pushname" => form.pushname = Some(value),
                "is_ai_reply" => form.is_ai_reply = truthy(&value),
                _ => {}
            }
        }
        Ok(form)
    }

    fn into_parts(
        self,
        file_field: &str,
    ) -> Result<(String, Upload, Option<String>, Origin), BridgeError> {
        let file = self
            .file
            .ok_or_else(|| BridgeError::InvalidRequest(format!("missing `{file_field}` file")))?;
        let origin = Origin::from_request(self.is_ai_reply, self.pushname);
        Ok((self.number, file, self.caption, origin))
    }
}

/// `POST /send-image-upload`
async fn send_image_upload(
    headers: HeaderMap,
    State(state): State<ApiState>,
    multipart: Multipart,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let form = UploadForm::read(multipart, "image")
        .await
        .map_err(error_response)?;
    let (number, upload, caption, origin) = form.into_parts("image").map_err(error_response)?;
    state
        .gateway
        .send_image_upload(&number, upload, caption.as_deref(), &origin)
        .await
        .map(sent)
        .map_err(error_response)
}

/// `POST /send-document-upload`
async fn send_document_upload(
    headers: HeaderMap,
    State(state): State<ApiState>,
    multipart: Multipart,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let form = UploadForm::read(multipart, "document")
        .await
        .map_err(error_response)?;
    let (number, upload, caption, origin) =
        form.into_parts("document").map_err(error_response)?;
    state
        .gateway
        .send_document_upload(&number, upload, caption.as_deref(), &origin)
        .await
        .map(sent)
        .map_err(error_response)
}

async fn typing(
    state: &ApiState,
    payload: Result<Json<TypingRequest>, JsonRejection>,
    on: bool,
) -> ApiResult {
    let req = body(payload)?;
    state
        .gateway
        .set_typing(&req.number, on)
        .await
        .map_err(error_response)?;
    let action = if on { "typing started" } else { "typing stopped" };
    Ok(Json(json!({"status": "success", "action": action})))
}

/// `POST /start-typing`
async fn start_typing(
    headers: HeaderMap,
    State(state): State<ApiState>,
    payload: Result<Json<TypingRequest>, JsonRejection>,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    typing(&state, payload, true).await
}

/// `POST /stop-typing`
async fn stop_typing(
    headers: HeaderMap,
    State(state): State<ApiState>,
    payload: Result<Json<TypingRequest>, JsonRejection>,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    typing(&state, payload, false).await
}

/// `POST /read-message`
async fn read_message(
    headers: HeaderMap,
    State(state): State<ApiState>,
    payload: Result<Json<ReadRequest>, JsonRejection>,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let req = body(payload)?;
    state
        .gateway
        .mark_read(&req.remote_jid, &req.message_id)
        .await
        .map_err(error_response)?;
    Ok(Json(
        json!({"status": "success", "action": "message marked as read"}),
    ))
}

/// `GET /api/chats`
async fn list_chats(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let contacts = state
        .gateway
        .history()
        .list_conversations()
        .await
        .map_err(error_response)?;
    Ok(Json(json!({"success": true, "contacts": contacts})))
}

/// `GET /api/chats/{number}`
async fn chat_history(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(number): Path<String>,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let conversation = ConversationId::parse(&number).map_err(error_response)?;
    let history = state
        .gateway
        .history()
        .read(&conversation)
        .await
        .map_err(error_response)?;
    let unread = wabridge_memory::history::unread_count(&history);
    Ok(Json(json!({
        "success": true,
        "history": history,
        "unreadCount": unread,
    })))
}

/// `POST /api/chats/{number}/read`
async fn mark_chat_read(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(number): Path<String>,
) -> ApiResult {
    check_auth(&headers, &state.api_key)?;
    let conversation = ConversationId::parse(&number).map_err(error_response)?;
    let updated = state
        .gateway
        .history()
        .mark_all_read(&conversation)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({"success": true, "updated": updated})))
}

pub fn build_router(state: ApiState) -> Router {
    let media = ServeDir::new(&state.media_dir);
    Router::new()
        .route("/status", get(status))
        .route("/qr.png", get(qr_png))
        .route("/disconnect", post(disconnect))
        .route("/send-text", post(send_text))
        .route("/send-text-ai", post(send_text_ai))
        .route("/send-image", post(send_image))
        .route("/send-document", post(send_document))
        .route("/send-image-upload", post(send_image_upload))
        .route("/send-document-upload", post(send_document_upload))
        .route("/start-typing", post(start_typing))
        .route("/stop-typing", post(stop_typing))
        .route("/read-message", post(read_message))
        .route("/api/chats", get(list_chats))
        .route("/api/chats/{number}", get(chat_history))
        .route("/api/chats/{number}/read", post(mark_chat_read))
        .nest_service("/media", media)
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Run the API server until `shutdown` resolves.
pub async fn serve<F>(config: &ApiConfig, state: ApiState, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("API server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("API server listening on {addr}");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("API server error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "wabridgeboundary";

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    fn router(h: &Harness, api_key: &str) -> Router {
        build_router(ApiState::new(
            h.gateway.clone(),
            api_key,
            h.media_dir.clone(),
        ))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Build a multipart body with text fields and one file.
    fn multipart(
        uri: &str,
        fields: &[(&str, &str)],
        file: (&str, &str, &str, &[u8]),
    ) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            let part = format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"{name}\"\r\n\r\n\
                 {value}\r\n"
            );
            body.extend_from_slice(part.as_bytes());
        }
        let (field, file_name, mimetype, bytes) = file;
        let head = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: {mimetype}\r\n\r\n"
        );
        body.extend_from_slice(head.as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post(uri)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    // -----------------------------------------------------------------------
    // Auth and status
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_status_connected() {
        let h = Harness::connected().await;
        let resp = router(&h, "")
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "connected");
        assert_eq!(json["number"], "628999");
        assert!(json["qr"].is_null());
        assert!(json["qr_png_base64"].is_null());
    }

    #[tokio::test]
    async fn test_status_requires_token() {
        let h = Harness::connected().await;
        let resp = router(&h, "secret")
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router(&h, "secret")
            .oneshot(
                Request::get("/status")
                    .header("Authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router(&h, "secret")
            .oneshot(
                Request::get("/status")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_pairing_qr_exposed() {
        let h = Harness::build(false, FakeSession::default(), FakeForward::default()).await;
        let app = router(&h, "");

        let json = body_json(
            app.clone()
                .oneshot(Request::get("/status").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(json["status"], "connecting");
        assert_eq!(json["qr"], "2@pairing");
        let png = BASE64
            .decode(json["qr_png_base64"].as_str().unwrap())
            .unwrap();
        assert_eq!(&png[..4], b"\x89PNG");

        let resp = app
            .oneshot(Request::get("/qr.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "image/png");
    }

    #[tokio::test]
    async fn test_qr_png_missing_when_connected() {
        let h = Harness::connected().await;
        let resp = router(&h, "")
            .oneshot(Request::get("/qr.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let h = Harness::connected().await;
        let resp = router(&h, "")
            .oneshot(Request::post("/disconnect").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["success"], true);
    }

    // -----------------------------------------------------------------------
    // Send endpoints
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_send_text_ai_reply() {
        let h = Harness::connected().await;
        let resp = router(&h, "")
            .oneshot(post_json(
                "/send-text",
                json!({"number": "628111", "message": "Halo kak", "is_ai_reply": "true"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["messageId"], "MSG1");

        let history = h.history("628111").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].display_name, "AI Assistant");
    }

    #[tokio::test]
    async fn test_send_text_ai_endpoint_always_records() {
        let h = Harness::connected().await;
        let resp = router(&h, "")
            .oneshot(post_json(
                "/send-text-ai",
                json!({"number": "628111", "message": "Stok ready", "pushname": "Nveeta"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(h.history("628111").await[0].display_name, "Nveeta");
    }

    #[tokio::test]
    async fn test_send_errors_map_to_status_codes() {
        let h = Harness::connected().await;
        let resp = router(&h, "")
            .oneshot(post_json(
                "/send-text",
                json!({"number": "62 811", "message": "x"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["status"], "error");

        let resp = router(&h, "")
            .oneshot(
                Request::post("/send-text")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let offline = Harness::build(false, FakeSession::default(), FakeForward::default()).await;
        let resp = router(&offline, "")
            .oneshot(post_json(
                "/send-text",
                json!({"number": "628111", "message": "x"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_image_upload_rejects_non_image() {
        let h = Harness::connected().await;
        let resp = router(&h, "")
            .oneshot(multipart(
                "/send-image-upload",
                &[("number", "628111")],
                ("image", "notes.txt", "text/plain", b"hello"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(h.session.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_document_upload_sends_file() {
        let h = Harness::connected().await;
        let resp = router(&h, "")
            .oneshot(multipart(
                "/send-document-upload",
                &[("number", "628111"), ("is_ai_reply", "1")],
                ("document", "invoice.pdf", "application/pdf", b"%PDF-1.4"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            h.session.sent.lock().unwrap()[0].1,
            "document:8:invoice.pdf:application/pdf"
        );
        assert_eq!(h.history("628111").await[0].text, "[Document] invoice.pdf");
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let h = Harness::connected().await;
        let resp = router(&h, "")
            .oneshot(multipart(
                "/send-image-upload",
                &[("number", "628111")],
                ("other", "a.jpg", "image/jpeg", b"x"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_typing_and_read_receipts() {
        let h = Harness::connected().await;
        let app = router(&h, "");
        let resp = app
            .clone()
            .oneshot(post_json("/start-typing", json!({"number": "628111"})))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["action"], "typing started");

        let resp = app
            .clone()
            .oneshot(post_json("/stop-typing", json!({"number": "628111"})))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["action"], "typing stopped");

        let resp = app
            .oneshot(post_json(
                "/read-message",
                json!({"remoteJid": "628111@s.whatsapp.net", "messageId": "ABC"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(*h.session.typing.lock().unwrap(), vec![true, false]);
        assert_eq!(*h.session.reads.lock().unwrap(), vec!["ABC".to_string()]);
    }

    // -----------------------------------------------------------------------
    // History and media
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_chat_history_and_read_marking() {
        let h = Harness::connected().await;
        h.gateway
            .handle_message(text_message(false, "halo", "C1"))
            .await;
        h.gateway
            .handle_message(text_message(false, "ada promo?", "C2"))
            .await;
        let app = router(&h, "");

        let json = body_json(
            app.clone()
                .oneshot(Request::get("/api/chats").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(json["contacts"][0]["number"], "628111");
        assert_eq!(json["contacts"][0]["contactName"], "Budi");
        assert_eq!(json["contacts"][0]["messageCount"], 2);

        let json = body_json(
            app.clone()
                .oneshot(Request::get("/api/chats/628111").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(json["unreadCount"], 2);
        assert_eq!(json["history"][1]["message"], "ada promo?");

        let resp = app
            .clone()
            .oneshot(
                Request::post("/api/chats/628111/read")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["updated"], 2);

        let json = body_json(
            app.oneshot(Request::get("/api/chats/628111").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(json["unreadCount"], 0);
    }

    #[tokio::test]
    async fn test_unknown_chat_is_empty() {
        let h = Harness::connected().await;
        let json = body_json(
            router(&h, "")
                .oneshot(Request::get("/api/chats/620000").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(json["history"].as_array().unwrap().len(), 0);
        assert_eq!(json["unreadCount"], 0);
    }

    #[tokio::test]
    async fn test_media_served_without_token() {
        let h = Harness::connected().await;
        std::fs::write(h.media_dir.join("1700000000000-abcd1234.jpg"), b"jpegbytes").unwrap();

        let resp = router(&h, "secret")
            .oneshot(
                Request::get("/media/1700000000000-abcd1234.jpg")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"jpegbytes");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
