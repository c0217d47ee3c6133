//! Parley Server Library
//!
//! Exposes the server's modules for the binary and for integration tests.

pub mod auth;
pub mod connection;
pub mod constants;
pub mod db;
pub mod hub;
pub mod server;
pub mod session;
