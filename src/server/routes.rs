//! Axum route handlers for the webhook server.
//!
//! # Routes
//!
//! - `GET  /`                      — service banner
//! - `GET  /health`                — liveness probe
//! - `POST /webhook/whatsapp`      — JSON in, routed to the MetaAgent
//! - `POST /webhook/sms-response`  — signed form in, routed to the listener
//! - `GET  /webhook/logs?lines=N`  — tail of the webhook log

use std::collections::BTreeMap;

use axum::extract::{Host, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use super::signature::validate_signature;
use crate::agents::is_success;
use crate::overseer::Overseer;
use crate::utilities::logger::{tail_log, LogLevel, RuntimeLogger};

/// Empty TwiML reply: the SMS provider expects XML and no auto-response.
const TWIML_EMPTY: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

/// Opaque 500 body; internal traces never reach clients.
const OPAQUE_ERROR: &str = "Erreur interne du serveur";

/// Shared state for the webhook application.
#[derive(Clone)]
pub struct AppState {
    /// Provider-shared secret for SMS signature checks.
    pub auth_token: Option<String>,
    /// Scheme used to reconstruct the signed request URL.
    pub url_scheme: String,
}

impl AppState {
    /// Read the SMS auth token and URL scheme from the environment.
    pub fn from_env() -> Self {
        Self {
            auth_token: std::env::var("TWILIO_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
            url_scheme: std::env::var("BERINIA_WEBHOOK_SCHEME")
                .unwrap_or_else(|_| "https".to_string()),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/webhook/whatsapp", post(whatsapp_handler))
        .route("/webhook/sms-response", post(sms_handler))
        .route("/webhook/logs", get(logs_handler))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// GET / — service banner.
async fn root_handler() -> impl IntoResponse {
    Json(json!({"status": "ok", "message": "BerinIA Webhook Server"}))
}

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "healthy", "version": crate::VERSION}))
}

/// Pull `(content, sender, profile_name)` out of a WhatsApp payload.
///
/// Two shapes are accepted: `{sender, profile_name, message: {text}}` and
/// the bot relay shape `{author, content, group?}`.
fn extract_whatsapp(data: &Value) -> Option<(String, String, String)> {
    if let Some(message) = data.get("message").and_then(Value::as_object) {
        let content = message.get("text").and_then(Value::as_str)?;
        let sender = data.get("sender").and_then(Value::as_str)?;
        let profile = data
            .get("profile_name")
            .and_then(Value::as_str)
            .unwrap_or("WhatsApp");
        return Some((content.to_string(), sender.to_string(), profile.to_string()));
    }
    if let Some(content) = data.get("content").and_then(Value::as_str) {
        let sender = data.get("author").and_then(Value::as_str)?;
        let profile = match data.get("group").and_then(Value::as_str) {
            Some(group) => format!("{group} (WhatsApp)"),
            None => "WhatsApp".to_string(),
        };
        return Some((content.to_string(), sender.to_string(), profile));
    }
    None
}

/// POST /webhook/whatsapp — conversational entry through the MetaAgent.
async fn whatsapp_handler(
    State(_state): State<AppState>,
    Json(data): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let logger = RuntimeLogger::global();
    logger.webhook_event("whatsapp", "message_received", "requête webhook WhatsApp", LogLevel::Info);

    let Some((content, sender, profile)) = extract_whatsapp(&data) else {
        logger.webhook_event(
            "whatsapp",
            "invalid_payload",
            "message incomplet",
            LogLevel::Warning,
        );
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Message incomplet"})),
        ));
    };

    let result = Overseer::global()
        .execute(
            "MetaAgent",
            json!({
                "message": content,
                "source": "whatsapp",
                "sender": sender,
                "profile_name": profile,
            }),
        )
        .await;

    if is_success(&result) {
        let response = result
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or("Message reçu.");
        logger.webhook_event("whatsapp", "message_processed", &format!("de {sender}"), LogLevel::Info);
        Ok(Json(json!({"response": response})))
    } else {
        logger.webhook_event(
            "whatsapp",
            "processing_error",
            result.get("message").and_then(Value::as_str).unwrap_or("?"),
            LogLevel::Error,
        );
        Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": OPAQUE_ERROR})),
        ))
    }
}

/// POST /webhook/sms-response — provider-signed inbound SMS.
async fn sms_handler(
    State(state): State<AppState>,
    Host(host): Host,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let logger = RuntimeLogger::global();

    // Signature first: nothing downstream runs on an unauthenticated call.
    let Some(auth_token) = state.auth_token.as_deref() else {
        logger.webhook_event(
            "twilio",
            "auth_unavailable",
            "TWILIO_AUTH_TOKEN non configuré",
            LogLevel::Error,
        );
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Signature non vérifiable"})),
        ));
    };
    let provided = headers
        .get("X-Twilio-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let url = format!("{}://{}{}", state.url_scheme, host, uri.path());
    if !validate_signature(auth_token, &url, &params, provided) {
        logger.webhook_event(
            "twilio",
            "invalid_signature",
            &format!("signature invalide pour {url}"),
            LogLevel::Warning,
        );
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Signature invalide"})),
        ));
    }

    let missing: Vec<&str> = ["From", "To", "Body"]
        .into_iter()
        .filter(|field| !params.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        let detail = format!("Champs manquants: {}", missing.join(", "));
        logger.webhook_event("twilio", "invalid_payload", &detail, LogLevel::Warning);
        return Err((StatusCode::BAD_REQUEST, Json(json!({"error": detail}))));
    }

    logger.webhook_event(
        "twilio",
        "sms_received",
        &format!("SMS de {}", params["From"]),
        LogLevel::Info,
    );

    let sms_data = json!({
        "sender": params["From"],
        "recipient": params["To"],
        "body": params["Body"],
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "message_sid": params.get("MessageSid").cloned().unwrap_or_default(),
        "raw_data": params,
    });

    let listener_result = Overseer::global()
        .execute(
            "ResponseListenerAgent",
            json!({"action": "process_sms_response", "data": sms_data}),
        )
        .await;

    if is_success(&listener_result) {
        // Hand the normalized event to the interpreter, still via the Overseer.
        let target = listener_result
            .get("forward_to")
            .and_then(Value::as_str)
            .unwrap_or("ResponseInterpreterAgent");
        let interpretation = Overseer::global()
            .execute(
                target,
                json!({
                    "action": "interpret_response",
                    "data": listener_result.get("data").cloned().unwrap_or(Value::Null),
                }),
            )
            .await;
        let status = interpretation
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        logger.webhook_event(
            "twilio",
            "sms_processed",
            &format!("interprétation: {status}"),
            LogLevel::Info,
        );
    } else {
        logger.webhook_event(
            "twilio",
            "processing_error",
            listener_result
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("?"),
            LogLevel::Error,
        );
    }

    // The provider expects an empty TwiML document either way.
    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        TWIML_EMPTY.to_string(),
    ))
}

#[derive(Deserialize)]
struct LogsParams {
    lines: Option<usize>,
}

/// GET /webhook/logs?lines=N — last N lines of the webhook sink.
async fn logs_handler(Query(params): Query<LogsParams>) -> Json<Value> {
    let lines = params.lines.unwrap_or(50);
    let path = RuntimeLogger::global().webhook_log_path();
    match tail_log(&path, lines) {
        Ok(entries) => Json(json!({"logs": entries})),
        Err(_) => Json(json!({"logs": []})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry::AgentRegistry;
    use crate::agents::{Agent, AgentHandle};
    use crate::knowledge::offline::OfflineKnowledgeStore;
    use crate::listener::ResponseListenerAgent;
    use crate::llm::LLMService;
    use crate::meta::MetaAgent;
    use crate::server::signature::compute_signature;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Records every input it receives.
    struct RecordingAgent {
        name: String,
        inputs: Mutex<Vec<Value>>,
    }

    impl RecordingAgent {
        fn install(name: &str) -> Arc<Self> {
            let agent = Arc::new(Self {
                name: name.to_string(),
                inputs: Mutex::new(Vec::new()),
            });
            let handle: AgentHandle = agent.clone();
            AgentRegistry::global().register(name, handle);
            agent
        }
    }

    #[async_trait]
    impl Agent for RecordingAgent {
        fn name(&self) -> &str {
            &self.name
        }
        async fn run(&self, input: Value) -> Result<Value, crate::error::AgentError> {
            self.inputs.lock().push(input.clone());
            Ok(json!({"status": "success", "data": input.get("data").cloned()}))
        }
    }

    fn test_state() -> AppState {
        AppState {
            auth_token: Some("test_token".to_string()),
            url_scheme: "https".to_string(),
        }
    }

    fn form_body(pairs: &[(&str, &str)]) -> String {
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn urlencode(value: &str) -> String {
        let mut out = String::new();
        for byte in value.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(byte as char)
                }
                b' ' => out.push('+'),
                other => out.push_str(&format!("%{other:02X}")),
            }
        }
        out
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let app = app_router(test_state());
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_whatsapp_rejects_incomplete_payload() {
        let app = app_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/whatsapp")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"unrelated": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Message incomplet");
    }

    #[tokio::test]
    async fn test_whatsapp_routes_to_meta_agent() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("knowledge");
        std::fs::create_dir_all(&corpus).unwrap();
        let meta = MetaAgent::with_services(
            Some(
                dir.path()
                    .join("meta/config.json")
                    .to_string_lossy()
                    .into_owned(),
            ),
            LLMService::disabled(),
            Arc::new(OfflineKnowledgeStore::new(corpus)),
        )
        .unwrap();
        AgentRegistry::global().register("MetaAgent", Arc::new(meta));

        let app = app_router(test_state());
        let payload = json!({
            "sender": "+33611111111",
            "profile_name": "Client",
            "message": {"text": "bonjour, que peux-tu faire ?"}
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/whatsapp")
                    .header("Content-Type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["response"].is_string());
    }

    #[tokio::test]
    async fn test_sms_signature_flow() {
        // Real listener, recording interpreter: the whole chain is observable.
        let dir = tempfile::tempdir().unwrap();
        let listener = Arc::new(
            ResponseListenerAgent::with_llm(
                Some(
                    dir.path()
                        .join("response_listener/config.json")
                        .to_string_lossy()
                        .into_owned(),
                ),
                LLMService::disabled(),
            )
            .unwrap(),
        );
        AgentRegistry::global().register("ResponseListenerAgent", listener.clone());
        let interpreter = RecordingAgent::install("ResponseInterpreterAgent");

        let app = app_router(test_state());
        let fields = [
            ("Body", "#camp42 yes I'm interested"),
            ("From", "+33600000000"),
            ("To", "+33700000000"),
        ];

        // 1. Wrong signature: 403, nothing downstream runs.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/sms-response")
                    .header("Host", "localhost")
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .header("X-Twilio-Signature", "wrong")
                    .body(Body::from(form_body(&fields)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(interpreter.inputs.lock().is_empty());
        let stats = listener
            .run(json!({"action": "get_stats"}))
            .await
            .unwrap();
        assert_eq!(stats["stats"]["sms_received"], 0);

        // 2. Missing signature header: same refusal.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/sms-response")
                    .header("Host", "localhost")
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(Body::from(form_body(&fields)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // 3. Valid signature: 200 with empty TwiML, campaign extracted and
        // handed to the interpreter.
        let params: BTreeMap<String, String> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let url = "https://localhost/webhook/sms-response";
        let signature = compute_signature("test_token", url, &params);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/sms-response")
                    .header("Host", "localhost")
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .header("X-Twilio-Signature", signature.clone())
                    .body(Body::from(form_body(&fields)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(content_type.contains("application/xml"));
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(bytes, TWIML_EMPTY.as_bytes());

        let inputs = interpreter.inputs.lock();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0]["data"]["campaign_id"], "camp42");
        assert_eq!(inputs[0]["data"]["content"], "#camp42 yes I'm interested");

        // 4. Valid signature but missing required fields: 400.
        drop(inputs);
        let partial = [("From", "+33600000000")];
        let partial_params: BTreeMap<String, String> = partial
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let signature = compute_signature("test_token", url, &partial_params);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/sms-response")
                    .header("Host", "localhost")
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .header("X-Twilio-Signature", signature)
                    .body(Body::from(form_body(&partial)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("Champs manquants"));
    }

    #[tokio::test]
    async fn test_logs_endpoint_returns_array() {
        let app = app_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook/logs?lines=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["logs"].is_array());
    }
}
