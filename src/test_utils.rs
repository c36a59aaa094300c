//! Scripted catalog and fixtures shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, Once};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::catalog::Catalog;
use crate::client::{QueryError, QueryMeta, QueryOption};
use crate::types::{AgentService, Node, ServiceEntry, ServiceTags};

static LOGGER_INIT: Once = Once::new();

pub fn enable_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn service_tags(names: &[&str]) -> ServiceTags {
    names.iter().map(|n| (n.to_string(), vec![])).collect()
}

pub fn entry(address: &str, port: u16) -> ServiceEntry {
    ServiceEntry {
        node: Node {
            node: "node-1".into(),
            address: "192.168.0.1".into(),
            ..Default::default()
        },
        service: AgentService {
            id: format!("instance-{}", port),
            address: address.into(),
            port,
            ..Default::default()
        },
    }
}

pub fn unavailable() -> QueryError {
    QueryError::Response {
        status: http::StatusCode::SERVICE_UNAVAILABLE,
        meta: QueryMeta::default(),
        body: "No cluster leader".into(),
    }
}

/// Health response changed at `index`.
pub fn health(
    index: u64,
    entries: Vec<ServiceEntry>,
) -> Result<(QueryMeta, Vec<ServiceEntry>), QueryError> {
    Ok((QueryMeta { last_index: index }, entries))
}

#[derive(Debug, Clone, Copy)]
pub struct Call {
    pub wait_index: u64,
    pub at: Instant,
}

type Scripted<T> = VecDeque<Result<(QueryMeta, T), QueryError>>;

/// Catalog answering from queued responses. Once a queue runs dry, reads
/// block like a long poll until another response is queued.
#[derive(Default)]
pub struct FakeCatalog {
    services: Mutex<Scripted<ServiceTags>>,
    health: Mutex<HashMap<String, Scripted<Vec<ServiceEntry>>>>,
    service_calls: Mutex<Vec<Call>>,
    health_calls: Mutex<HashMap<String, Vec<Call>>>,
    pushed: Notify,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_services(&self, response: Result<(QueryMeta, ServiceTags), QueryError>) {
        self.services.lock().unwrap().push_back(response);
        self.pushed.notify_waiters();
    }

    pub fn push_health(
        &self,
        service: &str,
        response: Result<(QueryMeta, Vec<ServiceEntry>), QueryError>,
    ) {
        self.health
            .lock()
            .unwrap()
            .entry(service.to_string())
            .or_default()
            .push_back(response);
        self.pushed.notify_waiters();
    }

    pub fn service_calls(&self) -> Vec<Call> {
        self.service_calls.lock().unwrap().clone()
    }

    pub fn health_calls(&self, service: &str) -> Vec<Call> {
        self.health_calls
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn list_service_names(
        &self,
        qo: &QueryOption,
    ) -> Result<(QueryMeta, ServiceTags), QueryError> {
        self.service_calls.lock().unwrap().push(Call {
            wait_index: qo.wait_index,
            at: Instant::now(),
        });
        loop {
            let pushed = self.pushed.notified();
            let next = self.services.lock().unwrap().pop_front();
            if let Some(response) = next {
                return response;
            }
            pushed.await;
        }
    }

    async fn service_health(
        &self,
        service: &str,
        qo: &QueryOption,
    ) -> Result<(QueryMeta, Vec<ServiceEntry>), QueryError> {
        self.health_calls
            .lock()
            .unwrap()
            .entry(service.to_string())
            .or_default()
            .push(Call {
                wait_index: qo.wait_index,
                at: Instant::now(),
            });
        loop {
            let pushed = self.pushed.notified();
            let next = self
                .health
                .lock()
                .unwrap()
                .get_mut(service)
                .and_then(|queue| queue.pop_front());
            if let Some(response) = next {
                return response;
            }
            pushed.await;
        }
    }
}
