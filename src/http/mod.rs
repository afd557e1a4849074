//! HTTP surface: health, WebSocket upgrade and match inspection

pub mod routes;

pub use routes::build_router;
