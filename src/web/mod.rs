use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::broadcast};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{info, warn};

use crate::{
    engine::{Engine, TICK_SECS},
    grid::CellPos,
    scenario::Scenario,
    session::{Session, SessionError},
    snapshot::SessionSnapshot,
    source::{seed_levels, CatalogSource, PollutantReadings, PollutantSource, SourceError},
    tools::ToolKind,
};

pub struct WebServerConfig {
    pub scenario: Scenario,
    pub host: String,
    pub port: u16,
}

struct Game {
    engine: Engine,
    session: Option<Session>,
}

#[derive(Clone)]
struct AppState {
    game: Arc<Mutex<Game>>,
    catalog: Arc<CatalogSource>,
    broadcaster: broadcast::Sender<String>,
    scenario_name: String,
}

impl AppState {
    fn new(scenario: &Scenario) -> Self {
        let (tx, _) = broadcast::channel::<String>(256);
        Self {
            game: Arc::new(Mutex::new(Game {
                engine: scenario.build_engine(),
                session: None,
            })),
            catalog: Arc::new(scenario.catalog()),
            broadcaster: tx,
            scenario_name: scenario.name.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Game> {
        self.game.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot_of(&self, game: &Game) -> Option<SessionSnapshot> {
        game.session.as_ref().map(|session| {
            SessionSnapshot::capture(&self.scenario_name, session, &game.engine.settings().pollutants)
        })
    }

    fn publish(&self, snapshot: &SessionSnapshot) {
        if let Ok(payload) = serde_json::to_string(snapshot) {
            let _ = self.broadcaster.send(payload);
        }
    }
}

pub async fn run(config: WebServerConfig) -> Result<()> {
    let WebServerConfig {
        scenario,
        host,
        port,
    } = config;

    let state = AppState::new(&scenario);
    tokio::spawn(drive_ticks(state.clone()));
    let app = router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, scenario = %scenario.name, "air grid server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/cities", get(cities))
        .route("/api/readings/:city", get(readings))
        .route("/api/session", post(select_city))
        .route("/api/state", get(latest_state))
        .route("/api/tools", post(place_tool))
        .route("/api/tools/:row/:col", delete(remove_tool))
        .route("/api/events", get(stream_events))
        .with_state(state)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}

async fn drive_ticks(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(u64::from(TICK_SECS)));
    loop {
        interval.tick().await;
        if let Some(snapshot) = tick_current(&state) {
            state.publish(&snapshot);
        }
    }
}

/// Ticks whatever session is current. Finished sessions are left alone until
/// a new city is selected.
fn tick_current(state: &AppState) -> Option<SessionSnapshot> {
    let mut guard = state.lock();
    let game = &mut *guard;
    let session = game.session.as_mut()?;
    if session.is_over() {
        return None;
    }
    if let Err(err) = game.engine.tick(session) {
        warn!(error = %err, "tick failed");
        return None;
    }
    state.snapshot_of(game)
}

#[derive(Serialize)]
struct CitiesResponse {
    cities: Vec<String>,
}

async fn cities(State(state): State<AppState>) -> Json<CitiesResponse> {
    Json(CitiesResponse {
        cities: state.catalog.cities(),
    })
}

async fn readings(
    State(state): State<AppState>,
    Path(city): Path<String>,
) -> Result<Json<PollutantReadings>, ApiError> {
    Ok(Json(state.catalog.readings(&city)?))
}

#[derive(Deserialize)]
struct SelectCity {
    city: String,
}

async fn select_city(
    State(state): State<AppState>,
    Json(body): Json<SelectCity>,
) -> Json<SessionSnapshot> {
    let snapshot = {
        let mut guard = state.lock();
        let game = &mut *guard;
        let fallback = game.engine.settings().pollutants.fallbacks();
        let seed = seed_levels(state.catalog.as_ref(), &body.city, &fallback);
        let session = game.engine.new_session(&body.city, &seed);
        let snapshot = SessionSnapshot::capture(
            &state.scenario_name,
            &session,
            &game.engine.settings().pollutants,
        );
        game.session = Some(session);
        snapshot
    };
    state.publish(&snapshot);
    Json(snapshot)
}

#[derive(Serialize)]
struct StateEnvelope {
    scenario: String,
    frame: Option<SessionSnapshot>,
}

async fn latest_state(State(state): State<AppState>) -> Json<StateEnvelope> {
    let frame = {
        let guard = state.lock();
        state.snapshot_of(&guard)
    };
    Json(StateEnvelope {
        scenario: state.scenario_name.clone(),
        frame,
    })
}

#[derive(Deserialize)]
struct PlaceTool {
    row: usize,
    col: usize,
    tool: ToolKind,
}

async fn place_tool(
    State(state): State<AppState>,
    Json(body): Json<PlaceTool>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let snapshot = {
        let mut guard = state.lock();
        let session = guard.session.as_mut().ok_or(ApiError::NoSession)?;
        session.place(CellPos::new(body.row, body.col), body.tool)?;
        state.snapshot_of(&guard).ok_or(ApiError::NoSession)?
    };
    state.publish(&snapshot);
    Ok(Json(snapshot))
}

#[derive(Serialize)]
struct RemovalResponse {
    refund: Option<u32>,
    frame: SessionSnapshot,
}

async fn remove_tool(
    State(state): State<AppState>,
    Path((row, col)): Path<(usize, usize)>,
) -> Result<Json<RemovalResponse>, ApiError> {
    let (refund, frame) = {
        let mut guard = state.lock();
        let session = guard.session.as_mut().ok_or(ApiError::NoSession)?;
        let refund = session.remove(CellPos::new(row, col))?;
        let frame = state.snapshot_of(&guard).ok_or(ApiError::NoSession)?;
        (refund, frame)
    };
    if refund.is_some() {
        state.publish(&frame);
    }
    Ok(Json(RemovalResponse { refund, frame }))
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcaster.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(payload) => Some(Ok(Event::default().data(payload))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(2))
            .text("keep-alive"),
    )
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("no city selected")]
    NoSession,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NoSession => StatusCode::CONFLICT,
            ApiError::Session(SessionError::InsufficientFunds { .. }) => {
                StatusCode::PAYMENT_REQUIRED
            }
            ApiError::Session(SessionError::NoCell(_)) => StatusCode::NOT_FOUND,
            ApiError::Session(SessionError::Occupied { .. } | SessionError::GameOver) => {
                StatusCode::CONFLICT
            }
            ApiError::Source(SourceError::UnknownCity(_)) => StatusCode::NOT_FOUND,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    const SCENARIO: &str = r#"
name: web_single_cell
seed: 5
grid:
  fill_min: 1
  fill_max: 1
session:
  starting_balance: 20
  timer_secs: 2
cities:
  - name: Testville
    readings:
      pm25: { values: [40.0] }
"#;

    fn state() -> AppState {
        AppState::new(&Scenario::from_yaml(SCENARIO).expect("scenario parses"))
    }

    async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Starts a session and returns the generated source cell.
    async fn select(state: &AppState) -> (usize, usize) {
        let (status, frame) = call(state, "POST", "/api/session", Some(json!({ "city": "Testville" }))).await;
        assert_eq!(status, StatusCode::OK);
        let row = frame["source"]["row"].as_u64().unwrap() as usize;
        let col = frame["source"]["col"].as_u64().unwrap() as usize;
        (row, col)
    }

    async fn place(state: &AppState, row: usize, col: usize, tool: &str) -> (StatusCode, Value) {
        call(state, "POST", "/api/tools", Some(json!({ "row": row, "col": col, "tool": tool }))).await
    }

    #[tokio::test]
    async fn placement_without_a_session_conflicts() {
        let state = state();
        let (status, body) = place(&state, 0, 0, "transit").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "no city selected");
    }

    #[tokio::test]
    async fn placement_errors_map_to_status_codes() {
        let state = state();
        let (row, col) = select(&state).await;

        let (status, _) = place(&state, row, col, "renewable").await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        // the source is interior, so the corner is never filled on a one-cell grid
        let (status, _) = place(&state, 0, 0, "transit").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, frame) = place(&state, row, col, "transit").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(frame["balance"], 5);

        let (status, _) = place(&state, row, col, "transit").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn removing_transit_refunds_eight() {
        let state = state();
        let (row, col) = select(&state).await;
        place(&state, row, col, "transit").await;

        let (status, body) = call(&state, "DELETE", &format!("/api/tools/{row}/{col}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refund"], 8);
        assert_eq!(body["frame"]["balance"], 13);

        let (status, body) = call(&state, "DELETE", &format!("/api/tools/{row}/{col}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refund"], Value::Null);
    }

    #[tokio::test]
    async fn selecting_a_city_replaces_the_session() {
        let state = state();
        let (row, col) = select(&state).await;
        place(&state, row, col, "transit").await;

        select(&state).await;
        let (status, body) = call(&state, "GET", "/api/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scenario"], "web_single_cell");
        assert_eq!(body["frame"]["balance"], 20);
        assert_eq!(body["frame"]["tick"], 0);
        let cells = body["frame"]["cells"].as_array().unwrap();
        assert!(cells.iter().all(|cell| cell["tool"].is_null()));
    }

    #[tokio::test]
    async fn unknown_city_readings_are_not_found() {
        let state = state();
        let (status, body) = call(&state, "GET", "/api/readings/Testville", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pm25"]["values"], json!([40.0]));

        let (status, _) = call(&state, "GET", "/api/readings/Atlantis", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&state, "GET", "/api/cities", None).await;
        assert_eq!(body["cities"], json!(["Testville"]));
    }

    #[tokio::test]
    async fn ticking_stops_once_the_session_is_over() {
        let state = state();
        assert!(tick_current(&state).is_none());

        select(&state).await;
        let first = tick_current(&state).expect("session ticks");
        assert_eq!(first.tick, 1);
        let last = tick_current(&state).expect("final tick");
        assert!(last.game_over);
        assert_eq!(last.timer_secs, 0);
        assert!(tick_current(&state).is_none());

        let (status, _) = call(&state, "DELETE", "/api/tools/0/0", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
