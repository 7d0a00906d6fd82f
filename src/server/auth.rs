//! Minimal bearer-token gate for `/ws/stream`. No token configured means
//! every connection is accepted; this is a placeholder, not a full auth
//! layer.

use axum::extract::Query;
use std::collections::HashMap;

use super::ServerState;

/// Returns `true` when the request may proceed. WebSocket upgrades can't
/// set headers from the browser, so the token travels as a query
/// parameter instead.
pub fn is_authorized(state: &ServerState, query: &Query<HashMap<String, String>>) -> bool {
    match &state.config.server.bearer_token {
        None => true,
        Some(expected) => query.get("token").is_some_and(|t| t == expected),
    }
}
