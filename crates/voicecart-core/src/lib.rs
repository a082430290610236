// Core library: shopping list model, reconciler, collaborator traits,
// persistence, configuration, and the client-facing WebSocket transport.

pub mod config;
pub mod db;
pub mod error;
pub mod protocol;
pub mod services;
pub mod shopping;
pub mod store;
pub mod ws_server;
