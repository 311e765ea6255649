//! WebSocket transport for real-time collaborative sessions.
//!
//! One endpoint, `/ws`: a client connects, sends `join-document`, then
//! exchanges `operation` / `cursor-update` records against the joined
//! document. See [`protocol`] for the full message set.

pub mod handler;
pub mod protocol;

use crate::hub::Hub;
use axum::routing::get;
use axum::Router;
use handler::WsState;

/// Create the WebSocket router.
pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/ws", get(handler::ws_handler))
        .with_state(WsState { hub })
}
