use crate::actions::{CallState, RecordState};
use crate::config::AppConfig;
use crate::coordinator::Coordinator;
use crate::session::{ChatSurface, SendTarget, SessionError};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use nanoid::nanoid;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

struct AppState<S: ChatSurface> {
    coordinator: Arc<Coordinator<S>>,
    stream_interval: Duration,
}

impl<S: ChatSurface> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self { coordinator: self.coordinator.clone(), stream_interval: self.stream_interval }
    }
}

/// Serve the control endpoints and the frame stream until shutdown.
pub async fn serve<S: ChatSurface + 'static>(
    coordinator: Arc<Coordinator<S>>,
    cfg: &AppConfig,
) -> anyhow::Result<()> {
    let state = AppState { coordinator, stream_interval: cfg.stream_interval };
    let app = Router::new()
        .route("/health", get(health::<S>))
        .route("/call/toggle", post(toggle_call::<S>))
        .route("/recording/toggle", post(toggle_recording::<S>))
        .route("/message", post(send_message::<S>))
        .route("/stream", get(stream_upgrade::<S>))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", cfg.http_port);
    info!(%addr, "control surface listening");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

type HandlerResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn session_error(err: SessionError) -> (StatusCode, Json<Value>) {
    let (status, code) = match &err {
        SessionError::NotLoggedIn => (StatusCode::CONFLICT, "not_logged_in"),
        SessionError::NotConfigured(_) => (StatusCode::BAD_REQUEST, "not_configured"),
        SessionError::ElementMissing { .. } => (StatusCode::BAD_GATEWAY, "element_missing"),
        SessionError::Navigation(_) => (StatusCode::BAD_GATEWAY, "navigation_failed"),
        SessionError::Browser(_) => (StatusCode::BAD_GATEWAY, "browser_error"),
    };
    (status, Json(json!({ "error": code, "message": err.to_string() })))
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_request", "message": message })))
}

async fn health<S: ChatSurface>(State(state): State<AppState<S>>) -> Json<Value> {
    let status = state.coordinator.status().await;
    Json(json!({
        "status": "ok",
        "logged_in": status.logged_in,
        "call_active": status.call_active,
        "recording": status.recording,
    }))
}

async fn toggle_call<S: ChatSurface>(State(state): State<AppState<S>>) -> HandlerResult {
    match state.coordinator.toggle_call().await {
        Ok(CallState::Active) => Ok(Json(json!({ "state": "active" }))),
        Ok(CallState::Idle) => Ok(Json(json!({ "state": "idle" }))),
        Err(e) => {
            warn!(error = %e, "call toggle failed");
            Err(session_error(e))
        }
    }
}

async fn toggle_recording<S: ChatSurface>(State(state): State<AppState<S>>) -> HandlerResult {
    match state.coordinator.toggle_recording().await {
        Ok(RecordState::Recording) => Ok(Json(json!({ "state": "recording" }))),
        Ok(RecordState::Idle) => Ok(Json(json!({ "state": "idle" }))),
        Err(e) => {
            warn!(error = %e, "recording toggle failed");
            Err(session_error(e))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    contact: Option<String>,
    phone: Option<String>,
    text: String,
}

async fn send_message<S: ChatSurface>(
    State(state): State<AppState<S>>,
    Json(payload): Json<SendMessagePayload>,
) -> HandlerResult {
    if payload.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let target = match (payload.contact, payload.phone) {
        (Some(contact), None) if !contact.is_empty() => SendTarget::Contact(contact),
        (None, Some(phone)) if !phone.is_empty() => SendTarget::Phone(phone),
        _ => return Err(bad_request("exactly one of contact or phone is required")),
    };
    match state.coordinator.send_text(&target, &payload.text).await {
        Ok(()) => Ok(Json(json!({ "status": "sent" }))),
        Err(e) => {
            warn!(error = %e, "send failed");
            Err(session_error(e))
        }
    }
}

async fn stream_upgrade<S: ChatSurface + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<S>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_frames(socket, state))
}

/// Push one frame per interval until the observer goes away. Capture runs
/// outside the session lock, so a long poll cycle never freezes the feed.
async fn stream_frames<S: ChatSurface>(mut socket: WebSocket, state: AppState<S>) {
    let conn = nanoid!(8);
    info!(%conn, "stream observer connected");
    let mut ticker = interval(state.stream_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let frame = match state.coordinator.screenshot_b64().await {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(%conn, error = %e, "frame capture failed");
                        continue;
                    }
                };
                let payload = json!({ "type": "frame", "data": frame }).to_string();
                if socket.send(WsMessage::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
    info!(%conn, "stream observer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::Speaker;
    use crate::testing::{RecordingSpeaker, ScriptedSurface};

    fn state(surface: ScriptedSurface) -> AppState<ScriptedSurface> {
        let speaker: Arc<dyn Speaker> = Arc::new(RecordingSpeaker::default());
        let cfg = AppConfig {
            call_contact: "Ada".into(),
            voice_contact: "Ada".into(),
            ..AppConfig::default()
        };
        AppState {
            coordinator: Arc::new(Coordinator::new(surface, speaker, &cfg)),
            stream_interval: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn send_requires_exactly_one_target() {
        let state = state(ScriptedSurface::new());

        let both = SendMessagePayload {
            contact: Some("Ada".into()),
            phone: Some("15550100".into()),
            text: "hi".into(),
        };
        let (status, _) = send_message(State(state.clone()), Json(both)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let neither = SendMessagePayload { contact: None, phone: None, text: "hi".into() };
        let (status, _) = send_message(State(state.clone()), Json(neither)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let blank = SendMessagePayload { contact: Some("Ada".into()), phone: None, text: "  ".into() };
        let (status, _) = send_message(State(state), Json(blank)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_reports_session_failures() {
        let surface = ScriptedSurface::new();
        surface.set_logged_in(false);
        let state = state(surface);
        let payload = SendMessagePayload { contact: Some("Ada".into()), phone: None, text: "hi".into() };
        let (status, body) = send_message(State(state), Json(payload)).await.unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.0["error"], "not_logged_in");
    }

    #[tokio::test]
    async fn recording_endpoint_flips_state() {
        let state = state(ScriptedSurface::new());
        let first = toggle_recording(State(state.clone())).await.unwrap();
        assert_eq!(first.0["state"], "recording");
        let second = toggle_recording(State(state)).await.unwrap();
        assert_eq!(second.0["state"], "idle");
    }

    #[tokio::test]
    async fn unconfigured_toggle_is_rejected() {
        let speaker: Arc<dyn Speaker> = Arc::new(RecordingSpeaker::default());
        let cfg = AppConfig { call_contact: String::new(), ..AppConfig::default() };
        let state = AppState {
            coordinator: Arc::new(Coordinator::new(ScriptedSurface::new(), speaker, &cfg)),
            stream_interval: Duration::from_millis(100),
        };
        let (status, body) = toggle_call(State(state)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0["error"], "not_configured");
    }
}
