#![forbid(unsafe_code)]

pub mod accounts;
pub mod api;
pub mod auth;
pub mod connection;
pub mod gateway;
pub mod handshake;
pub mod health;
pub mod http;
pub mod hub;
pub mod messages;
pub mod password;
pub mod presence;
pub mod rate_limit;
pub mod state;
pub mod store;
pub mod throttle;
