//! The catalog contract the watchers run against.
//!
//! Both reads are blocking queries: they suspend until the resource index
//! moves past `QueryOption::wait_index` or `QueryOption::wait_time` elapses,
//! and report the index they observed in `QueryMeta`.

use async_trait::async_trait;

use crate::client::{Client, QueryError, QueryMeta, QueryOption};
use crate::types::{ServiceEntry, ServiceTags};

#[async_trait]
pub trait Catalog: Send + Sync {
    /// All registered service names with their tags.
    async fn list_service_names(
        &self,
        qo: &QueryOption,
    ) -> Result<(QueryMeta, ServiceTags), QueryError>;

    /// Instances of `service` as seen by the health endpoint.
    async fn service_health(
        &self,
        service: &str,
        qo: &QueryOption,
    ) -> Result<(QueryMeta, Vec<ServiceEntry>), QueryError>;
}

/// [`Catalog`] over a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulCatalog {
    client: Client,
    passing_only: bool,
}

impl ConsulCatalog {
    pub fn new(client: Client, passing_only: bool) -> Self {
        Self {
            client,
            passing_only,
        }
    }
}

#[async_trait]
impl Catalog for ConsulCatalog {
    async fn list_service_names(
        &self,
        qo: &QueryOption,
    ) -> Result<(QueryMeta, ServiceTags), QueryError> {
        self.client.catalog_services(Some(qo)).await
    }

    async fn service_health(
        &self,
        service: &str,
        qo: &QueryOption,
    ) -> Result<(QueryMeta, Vec<ServiceEntry>), QueryError> {
        self.client
            .health_service(service, self.passing_only, Some(qo))
            .await
    }
}
