//! Status endpoint: reports who currently holds the relay.
//!
//! Read-only view over the [`AccessGate`]. Each `GET /api/who` takes a
//! snapshot of the holder and resolves its address through the injected
//! [`IdentityResolver`].

use axum::extract::State;
use axum::http::header::CACHE_CONTROL;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use solo_core::{AccessGate, IdentityResolver, RelayError, RelayResult, WhoisOutcome};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

const INDEX_HTML: &str = include_str!("../static/index.html");
const INDEX_CACHE_CONTROL: &str = "max-age=604800, stale-while-revalidate=86400";
const NO_STORE: &str = "no-store";

/// Body of `GET /api/who`. `uses` is `null` when nobody holds the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Who {
    pub uses: Option<Uses>,
}

/// The current holder as shown to humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Uses {
    pub name: String,
    pub computer: String,
    /// Milliseconds since the Unix epoch.
    pub since: i64,
}

/// Shared handler state.
#[derive(Clone)]
pub struct StatusState {
    gate: Arc<AccessGate>,
    resolver: IdentityResolver,
}

impl StatusState {
    pub fn new(gate: Arc<AccessGate>, resolver: IdentityResolver) -> Self {
        Self { gate, resolver }
    }
}

/// Describe the current holder.
///
/// An unknown address is reported under its raw IP for both name and
/// computer.
///
/// # Errors
///
/// Returns [`RelayError::Whois`] when the lookup itself failed.
pub async fn who_uses(gate: &AccessGate, resolver: &IdentityResolver) -> RelayResult<Who> {
    let Some(holder) = gate.snapshot() else {
        return Ok(Who { uses: None });
    };

    let address = holder.address.to_string();
    let uses = match resolver(address.clone()).await {
        WhoisOutcome::Resolved(identity) => Uses {
            name: identity.display_name,
            computer: identity.computer_name,
            since: holder.since,
        },
        WhoisOutcome::NotFound => Uses {
            name: address.clone(),
            computer: address,
            since: holder.since,
        },
        WhoisOutcome::Failed(reason) => return Err(RelayError::Whois(reason)),
    };

    Ok(Who { uses: Some(uses) })
}

/// Routes: `/` (static page) and `/api/who`.
///
/// Both are `GET` routes, which also answer `HEAD`; any other method gets
/// `405 Method Not Allowed` with an empty body.
pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/who", get(who))
        .with_state(state)
}

/// Bind `addr` and serve the status routes until the server fails.
pub async fn serve(addr: &str, state: StatusState) -> RelayResult<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "status endpoint listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index() -> impl IntoResponse {
    ([(CACHE_CONTROL, INDEX_CACHE_CONTROL)], Html(INDEX_HTML))
}

async fn who(State(state): State<StatusState>) -> Response {
    match who_uses(&state.gate, &state.resolver).await {
        Ok(who) => ([(CACHE_CONTROL, NO_STORE)], Json(who)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to describe holder");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CACHE_CONTROL, NO_STORE)],
                "internal server error",
            )
                .into_response()
        }
    }
}
