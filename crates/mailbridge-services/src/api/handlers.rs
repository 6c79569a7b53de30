//! HTTP request handlers.

use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use mailbridge_channels::types::ActionRequest;
use mailbridge_core::CommandArgs;
use mailbridge_types::BridgeError;

use super::ApiState;

const COMPLETE_PAGE: &str = "<!DOCTYPE html>\n\
<html>\n\
<head>\n\
<script>window.close();</script>\n\
</head>\n\
<body>\n\
<p>Completed connecting to Gmail. Please close this window.</p>\n\
</body>\n\
</html>\n";

/// Build all routes (relative to the plugin prefix).
pub fn routes() -> Router<ApiState> {
    Router::new()
        // OAuth handshake
        .route("/oauth/connect", get(connect))
        .route("/oauth/complete", get(complete))
        // Interactive buttons
        .route("/command/disconnect", post(disconnect_action))
        // Slash commands
        .route("/command/execute", post(execute_command))
        // Provider push
        .route("/webhook/gmail", post(gmail_webhook))
        .route("/health", get(health_check))
}

fn status_of(err: &BridgeError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_response(status: StatusCode, err: &BridgeError) -> Response {
    (status, err.to_string()).into_response()
}

// ── OAuth ────────────────────────────────────────────────────────────────

async fn connect(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let Some(user_id) = state.authenticated_user(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match state.app.handshake.connect(&user_id).await {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(BridgeError::Unauthorized) => StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "failed to start oauth handshake");
            error_response(StatusCode::BAD_REQUEST, &e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompleteParams {
    #[serde(default)]
    state: String,
    #[serde(default)]
    code: String,
}

async fn complete(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<CompleteParams>,
) -> Response {
    let Some(user_id) = state.authenticated_user(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match state
        .app
        .handshake
        .complete(&user_id, &params.state, &params.code)
        .await
    {
        Ok(()) => Html(COMPLETE_PAGE).into_response(),
        Err(e) => error_response(status_of(&e), &e),
    }
}

// ── Commands ─────────────────────────────────────────────────────────────

async fn disconnect_action(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<ActionRequest>,
) -> Response {
    let Some(user_id) = state.authenticated_user(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match state
        .app
        .commands
        .handle_disconnect_action(&user_id, &request)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(BridgeError::Unauthorized) => StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

/// Outgoing slash-command request as sent by the chat server.
#[derive(Debug, Deserialize)]
struct SlashCommand {
    command: String,
    #[serde(default)]
    text: String,
    user_id: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    token: String,
}

async fn execute_command(
    State(state): State<ApiState>,
    Form(form): Form<SlashCommand>,
) -> Response {
    let expected = &state.app.config.command_token;
    if !expected.is_empty() && !expected.matches(&form.token) {
        warn!(user_id = %form.user_id, "slash command with bad token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let args = CommandArgs {
        command: format!("{} {}", form.command.trim(), form.text.trim()),
        user_id: form.user_id,
        channel_id: form.channel_id,
    };
    match state.app.commands.execute(&args).await {
        Ok(_) => Json(json!({})).into_response(),
        Err(e) => {
            warn!(user_id = %args.user_id, error = %e, "command reply failed");
            error_response(status_of(&e), &e)
        }
    }
}

// ── Webhook ──────────────────────────────────────────────────────────────

async fn gmail_webhook(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"));
    if !is_json {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }

    match state.app.reconciler.handle_push(&body).await {
        Ok(report) => {
            info!(
                mailbox = %report.mailbox,
                history_id = report.history_id,
                delivered = report.delivered(),
                skipped = report.skipped(),
                failed = report.failed(),
                "push notification processed"
            );
            Json(json!({
                "delivered": report.delivered(),
                "skipped": report.skipped(),
                "failed": report.failed(),
            }))
            .into_response()
        }
        Err(e) => {
            debug!(error = %e, "rejected push body");
            error_response(StatusCode::BAD_REQUEST, &e)
        }
    }
}

/// Server start time, set once at process start.
static START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

/// Returns basic health status, version, and uptime.
async fn health_check() -> Json<serde_json::Value> {
    let start = START_TIME.get_or_init(std::time::Instant::now);
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": start.elapsed().as_secs()
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use mailbridge_channels::MemoryPoster;
    use mailbridge_core::AppContext;
    use mailbridge_core::testing::{FakeConnector, FakeMailbox, FakeOAuth};
    use mailbridge_platform::kv::MemoryKvStore;
    use mailbridge_types::SecretString;
    use mailbridge_types::config::BridgeConfig;

    use super::*;
    use crate::api::build_router;

    struct Fixture {
        app: Arc<AppContext>,
        poster: Arc<MemoryPoster>,
        router: Router,
    }

    async fn fixture() -> Fixture {
        let config = BridgeConfig {
            site_url: Some("https://chat.example.com".into()),
            encryption_key: SecretString::new("s3cret"),
            command_token: SecretString::new("tok"),
            ..BridgeConfig::default()
        };
        let connector = Arc::new(FakeConnector::new());
        connector.insert("u1", Arc::new(FakeMailbox::new(5))).await;
        let poster = Arc::new(MemoryPoster::new("bot"));
        let app = Arc::new(AppContext::new(
            config,
            Arc::new(MemoryKvStore::new()),
            poster.clone(),
            Arc::new(FakeOAuth::new("u1@example.com")),
            connector,
        ));
        let router = build_router(ApiState::new(app.clone()));
        Fixture { app, poster, router }
    }

    fn get_as(uri: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(user) = user {
            builder = builder.header("Mattermost-User-Id", user);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn start_handshake(f: &Fixture, user: &str) -> String {
        let response = f
            .router
            .clone()
            .oneshot(get_as("/plugins/gmail/oauth/connect", Some(user)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        location.split("state=").nth(1).unwrap().to_string()
    }

    fn push(email: &str, history_id: u64) -> Request<Body> {
        use base64::Engine;
        let data = base64::engine::general_purpose::STANDARD.encode(
            json!({"emailAddress": email, "historyId": history_id}).to_string(),
        );
        Request::builder()
            .method("POST")
            .uri("/plugins/gmail/webhook/gmail")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"message": {"data": data}}).to_string()))
            .unwrap()
    }

    fn action(user: &str, action: &str, secret: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/plugins/gmail/command/disconnect")
            .header("Mattermost-User-Id", user)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "user_id": user,
                    "channel_id": "town",
                    "context": {"action": action, "action_secret": secret}
                })
                .to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let f = fixture().await;
        let response = f
            .router
            .oneshot(get_as("/plugins/gmail/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn connect_requires_user_header() {
        let f = fixture().await;
        let response = f
            .router
            .oneshot(get_as("/plugins/gmail/oauth/connect", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn connect_then_complete_links_mailbox() {
        let f = fixture().await;
        let state = start_handshake(&f, "u1").await;
        assert!(state.ends_with("_u1"));

        let response = f
            .router
            .clone()
            .oneshot(get_as(
                &format!("/plugins/gmail/oauth/complete?state={state}&code=abc"),
                Some("u1"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("window.close()"));
        assert!(f.app.handshake.is_connected("u1").await.unwrap());
    }

    #[tokio::test]
    async fn complete_with_unknown_state_is_bad_request() {
        let f = fixture().await;
        let response = f
            .router
            .oneshot(get_as(
                "/plugins/gmail/oauth/complete?state=nope_u1&code=abc",
                Some("u1"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn complete_by_another_user_is_unauthorized() {
        let f = fixture().await;
        let state = start_handshake(&f, "u1").await;
        let response = f
            .router
            .clone()
            .oneshot(get_as(
                &format!("/plugins/gmail/oauth/complete?state={state}&code=abc"),
                Some("u2"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!f.app.handshake.is_connected("u2").await.unwrap());
    }

    #[tokio::test]
    async fn webhook_rejects_non_json() {
        let f = fixture().await;
        let request = Request::builder()
            .method("POST")
            .uri("/plugins/gmail/webhook/gmail")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hi"))
            .unwrap();
        let response = f.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn webhook_rejects_garbage() {
        let f = fixture().await;
        let request = Request::builder()
            .method("POST")
            .uri("/plugins/gmail/webhook/gmail")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"message\":{}}"))
            .unwrap();
        let response = f.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_for_unknown_mailbox_is_accepted() {
        let f = fixture().await;
        let response = f
            .router
            .oneshot(push("stranger@example.com", 9))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"delivered\":0"));
    }

    #[tokio::test]
    async fn slash_command_checks_token() {
        let f = fixture().await;
        let request = Request::builder()
            .method("POST")
            .uri("/plugins/gmail/command/execute")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("command=%2Fgmail&text=help&user_id=u1&channel_id=town&token=bad"))
            .unwrap();
        let response = f.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(f.poster.ephemerals().await.is_empty());
    }

    #[tokio::test]
    async fn slash_command_replies_ephemerally() {
        let f = fixture().await;
        let request = Request::builder()
            .method("POST")
            .uri("/plugins/gmail/command/execute")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("command=%2Fgmail&text=help&user_id=u1&channel_id=town&token=tok"))
            .unwrap();
        let response = f.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "{}");
        let replies = f.poster.ephemeral_messages_for("u1").await;
        assert!(replies[0].contains("Available Commands"));
    }

    #[tokio::test]
    async fn disconnect_button_needs_secret() {
        let f = fixture().await;
        let response = f
            .router
            .oneshot(action("u1", "disconnect", "wrong"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disconnect_button_updates_post() {
        let f = fixture().await;
        let state = start_handshake(&f, "u1").await;
        f.app.handshake.complete("u1", &state, "abc").await.unwrap();

        let response = f
            .router
            .clone()
            .oneshot(action("u1", "disconnect", "s3cret"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("successfully disconnected"));
        assert!(!f.app.handshake.is_connected("u1").await.unwrap());
    }
}
