//! Admin hub server: real-time WebSocket push for the admin console.

pub mod auth;
pub mod config;
pub mod db;
pub mod frontend;
pub mod hub;
pub mod middleware;
pub mod presence;
pub mod routes;
pub mod state;
pub mod ws;
