use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::config::SupervisorConfig;
use crate::supervisor::{LeaseTable, Supervisor, WorkerRoster};

/// Read-only view over the supervisor's state. The dashboard never mutates
/// anything; coordination stays filesystem-only.
#[derive(Clone)]
pub struct DashboardState {
    pub table: Arc<RwLock<LeaseTable>>,
    pub roster: Arc<RwLock<WorkerRoster>>,
    pub config: SupervisorConfig,
    pub started_at: DateTime<Utc>,
    pub ticks: Arc<AtomicU64>,
}

impl DashboardState {
    pub fn from_supervisor(supervisor: &Supervisor) -> Self {
        Self {
            table: supervisor.table(),
            roster: supervisor.roster(),
            config: supervisor.config().clone(),
            started_at: supervisor.started_at(),
            ticks: supervisor.tick_counter(),
        }
    }
}

#[derive(Serialize)]
struct LeaseResponse {
    id: u64,
    state: String,
    mtime: DateTime<Utc>,
    first_seen: DateTime<Utc>,
    age_secs: u64,
}

#[derive(Serialize)]
struct WorkerResponse {
    id: u64,
    busy: bool,
    completions: u64,
    last_completed: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SupervisorResponse {
    lease_dir: String,
    freshness_window_secs: f64,
    poll_interval_secs: f64,
    startup_grace_secs: f64,
    started_at: DateTime<Utc>,
    uptime_secs: i64,
    ticks: u64,
    tracked_leases: usize,
}

/// Build the dashboard router; separated from [`run_dashboard`] so tests
/// can drive it without binding a port.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/leases", get(leases_handler))
        .route("/api/workers", get(workers_handler))
        .route("/api/supervisor", get(supervisor_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState) {
    let app = router(state);

    tracing::info!(addr = %addr, "starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "dashboard server failed");
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn leases_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let now = SystemTime::now();
    let table = state.table.read().await;
    let leases: Vec<LeaseResponse> = table
        .records()
        .into_iter()
        .map(|record| LeaseResponse {
            id: record.id,
            state: record.state.to_string(),
            mtime: record.mtime.into(),
            first_seen: record.first_seen.into(),
            age_secs: now
                .duration_since(record.mtime)
                .map(|age| age.as_secs())
                .unwrap_or(0),
        })
        .collect();

    Json(leases)
}

async fn workers_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let roster = state.roster.read().await;
    let workers: Vec<WorkerResponse> = roster
        .workers()
        .into_iter()
        .map(|worker| WorkerResponse {
            id: worker.id,
            busy: worker.busy,
            completions: worker.completions,
            last_completed: worker.last_completed,
        })
        .collect();

    Json(workers)
}

async fn supervisor_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let tracked = state.table.read().await.len();
    Json(SupervisorResponse {
        lease_dir: state.config.lease_dir.display().to_string(),
        freshness_window_secs: state.config.freshness_window.as_secs_f64(),
        poll_interval_secs: state.config.poll_interval.as_secs_f64(),
        startup_grace_secs: state.config.startup_grace.as_secs_f64(),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        ticks: state.ticks.load(Ordering::Relaxed),
        tracked_leases: tracked,
    })
}
