#![cfg(feature = "federation")]
//! Resource-server-side client for the hub: token exchange, refresh, and
//! machine credential bootstrap.

pub mod exchange;

pub use exchange::{FederatedTokenExchange, FederationConfig, HubEndpoints, RemoteServer};
