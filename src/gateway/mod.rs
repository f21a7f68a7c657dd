/// Gateway layer - the inbound HTTP/websocket surface. Depends on the
/// application and domain layers; owns the shared [`state::AppState`].
pub mod messages;
pub mod routes;
pub mod state;
