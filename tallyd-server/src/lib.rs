//! HTTP/websocket surface of the tallyd coordinator.

pub mod auth;
pub mod clients;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;
