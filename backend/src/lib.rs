pub mod config;
pub mod error;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures::{Sink, SinkExt, StreamExt};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use santa_core::{Assignment, DrawStatus, DrawStrategy, ParticipantSummary, RosterError};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::store::{RosterStore, RosterView, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: RosterStore,
    pub strategy: DrawStrategy,
}

impl Default for AppState {
    fn default() -> Self {
        let config = Config::default();
        Self {
            store: RosterStore::in_memory(&config.default_admin_pin),
            strategy: config.strategy,
        }
    }
}

impl AppState {
    pub async fn from_config(config: &Config) -> Result<Self, StoreError> {
        let store = match &config.persist_path {
            Some(path) => RosterStore::with_persistence(path, &config.default_admin_pin).await?,
            None => RosterStore::in_memory(&config.default_admin_pin),
        };
        Ok(Self {
            store,
            strategy: config.strategy,
        })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/participants", get(list_participants).post(join))
        .route("/participants/:id", delete(remove_participant))
        .route("/status", get(status))
        .route("/assignment", post(check_assignment))
        .route("/admin/draw", post(perform_draw))
        .route("/admin/reset", post(reset_draw))
        .route("/admin/wipe", post(wipe_all))
        .route("/admin/pin", put(update_admin_pin))
        .route("/admin/assignments", get(list_assignments))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

const ADMIN_PIN_HEADER: &str = "x-admin-pin";

fn admin_pin(headers: &HeaderMap) -> &str {
    headers
        .get(ADMIN_PIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Logs rejected operations. Pins never reach the log.
fn audit<T>(op: &'static str, result: Result<T, ApiError>) -> Result<T, ApiError> {
    match &result {
        Err(ApiError::Roster(RosterError::InvalidAdminPin)) => warn!(op, "invalid admin pin"),
        Err(ApiError::Roster(err)) => debug!(op, error = %err, "operation rejected"),
        // already logged by the store
        Err(ApiError::Store(_)) | Ok(_) => {}
    }
    result
}

#[derive(Deserialize)]
struct Credentials {
    name: String,
    pin: String,
}

#[derive(Deserialize)]
struct PinChange {
    old_pin: String,
    new_pin: String,
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct AssignmentResponse {
    recipient: String,
}

#[derive(Serialize)]
struct WipeResponse {
    removed: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Roster(RosterView),
}

async fn list_participants(State(state): State<AppState>) -> Json<Vec<ParticipantSummary>> {
    Json(state.store.read(|r| r.list_participants()).await)
}

async fn status(State(state): State<AppState>) -> Json<DrawStatus> {
    Json(state.store.read(|r| r.status()).await)
}

async fn join(
    State(state): State<AppState>,
    Json(payload): Json<Credentials>,
) -> Result<(StatusCode, Json<ParticipantSummary>), ApiError> {
    let id = Uuid::new_v4().to_string();
    let joined_at = now_millis();
    let joined = state
        .store
        .commit(|roster| {
            roster
                .join(id, &payload.name, &payload.pin, joined_at)
                .map(ParticipantSummary::from)
        })
        .await;
    let participant = audit("join", joined)?;

    info!(participant_id = %participant.id, name = %participant.name, "participant joined");
    Ok((StatusCode::CREATED, Json(participant)))
}

async fn remove_participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let pin = admin_pin(&headers);
    let removed = state
        .store
        .commit(|roster| roster.remove_participant(&id, pin))
        .await;
    let removed = audit("remove_participant", removed)?;

    info!(participant_id = %removed.id, name = %removed.name, "participant removed");
    Ok(StatusCode::NO_CONTENT)
}

async fn wipe_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WipeResponse>, ApiError> {
    let pin = admin_pin(&headers);
    let removed = audit("wipe_all", state.store.commit(|roster| roster.wipe_all(pin)).await)?;

    info!(removed, "roster wiped");
    Ok(Json(WipeResponse { removed }))
}

async fn perform_draw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DrawParams>,
) -> Result<Json<DrawStatus>, ApiError> {
    let pin = admin_pin(&headers);
    let mut rng = params
        .seed
        .map(ChaCha20Rng::seed_from_u64)
        .unwrap_or_else(ChaCha20Rng::from_entropy);
    let now = now_millis();
    let strategy = state.strategy;

    let drawn = state
        .store
        .commit(|roster| {
            roster.perform_draw(pin, strategy, &mut rng, now)?;
            Ok(roster.status())
        })
        .await;
    let status = audit("perform_draw", drawn)?;

    info!(
        participants = status.participant_count,
        seeded = params.seed.is_some(),
        ?strategy,
        "draw completed"
    );
    Ok(Json(status))
}

async fn reset_draw(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DrawStatus>, ApiError> {
    let pin = admin_pin(&headers);
    let reset = state
        .store
        .commit(|roster| {
            roster.reset_draw(pin)?;
            Ok(roster.status())
        })
        .await;
    let status = audit("reset_draw", reset)?;

    info!("draw reset");
    Ok(Json(status))
}

async fn update_admin_pin(
    State(state): State<AppState>,
    Json(payload): Json<PinChange>,
) -> Result<StatusCode, ApiError> {
    let updated = state
        .store
        .commit(|roster| roster.update_admin_pin(&payload.old_pin, &payload.new_pin))
        .await;
    audit("update_admin_pin", updated)?;

    info!("admin pin updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn check_assignment(
    State(state): State<AppState>,
    Json(payload): Json<Credentials>,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let recipient = state
        .store
        .read(|roster| {
            roster
                .check_assignment(&payload.name, &payload.pin)
                .map(str::to_string)
        })
        .await
        .map_err(ApiError::from);
    let recipient = audit("check_assignment", recipient)?;
    Ok(Json(AssignmentResponse { recipient }))
}

async fn list_assignments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Assignment>>, ApiError> {
    let pin = admin_pin(&headers);
    let listing = state
        .store
        .read(|roster| roster.list_assignments(pin))
        .await
        .map_err(ApiError::from);
    Ok(Json(audit("list_assignments", listing)?))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(stream: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = stream.split();

    // Subscribe before taking the snapshot so no update is missed in between.
    let mut updates = state.store.subscribe();
    let snapshot = state.store.read(|r| RosterView::from(r)).await;
    if send_message(&mut sender, &ServerMessage::Roster(snapshot))
        .await
        .is_err()
    {
        return;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(view) => {
                    if send_message(&mut sender, &ServerMessage::Roster(view))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "websocket client lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // The feed is read-only; incoming frames only matter for detecting close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_message<S>(sender: &mut S, msg: &ServerMessage) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}
