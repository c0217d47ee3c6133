//! Parley Client Library
//!
//! Exposes the client's modules for the binary and for integration tests.

pub mod auth;
pub mod commands;
pub mod constants;
pub mod conversations;
pub mod session;
pub mod store;
pub mod transport;
pub mod vault;
