//! Bridges the Consul catalog to Envoy's v1 discovery API.
//!
//! A catalog watcher long-polls the service listing, a reconciler keeps one
//! watcher per service and rebuilds the cluster and route snapshots, and each
//! service watcher keeps that service's endpoint list current. All results land
//! in a [`cache::ResponseCache`] that the HTTP façade reads from.

#[macro_use]
extern crate serde_derive;

pub mod api;
pub mod backoff;
pub mod cache;
pub mod catalog;
pub mod catalog_watcher;
pub mod client;
pub mod config;
pub mod engine;
pub mod envoy;
pub mod error;
pub mod reconciler;
pub mod resolve;
pub mod server;
pub mod service_watcher;
pub mod translate;
pub mod types;
pub mod watch;

#[cfg(test)]
mod test_utils;

pub use error::{Error, Result};
