use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;

use crate::envoy::{
    ClusterDiscoveryResponse, Host, RouteDiscoveryResponse, ServiceDiscoveryResponse,
};

/// Identifies the service watcher that owns a slot.
pub type WatcherId = u64;

#[derive(Debug, Clone)]
struct EndpointSlot {
    owner: WatcherId,
    response: Arc<ServiceDiscoveryResponse>,
}

/// Precomputed responses shared between the watchers and the query façade.
///
/// Every slot holds an immutable value that is replaced whole, so readers never
/// wait on writers and never observe a partially built response.
#[derive(Debug, Default)]
pub struct ResponseCache {
    endpoints: DashMap<String, EndpointSlot>,
    clusters: ArcSwap<ClusterDiscoveryResponse>,
    routes: ArcSwap<RouteDiscoveryResponse>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clusters(&self) -> Arc<ClusterDiscoveryResponse> {
        self.clusters.load_full()
    }

    pub fn routes(&self) -> Arc<RouteDiscoveryResponse> {
        self.routes.load_full()
    }

    /// `None` until a watcher has published for `service`, and again once it
    /// has been retired.
    pub fn endpoints(&self, service: &str) -> Option<Arc<ServiceDiscoveryResponse>> {
        self.endpoints.get(service).map(|slot| slot.response.clone())
    }

    pub fn service_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn publish_clusters(&self, clusters: ClusterDiscoveryResponse) {
        self.clusters.store(Arc::new(clusters));
    }

    pub fn publish_routes(&self, routes: RouteDiscoveryResponse) {
        self.routes.store(Arc::new(routes));
    }

    pub fn store_endpoints(&self, service: &str, owner: WatcherId, hosts: Vec<Host>) {
        self.endpoints.insert(
            service.to_string(),
            EndpointSlot {
                owner,
                response: Arc::new(ServiceDiscoveryResponse { hosts }),
            },
        );
    }

    /// Drops the slot of `service` if `owner` wrote it last. A watcher that
    /// replaced a retired one keeps its slot.
    pub fn remove_endpoints(&self, service: &str, owner: WatcherId) -> bool {
        self.endpoints
            .remove_if(service, |_, slot| slot.owner == owner)
            .is_some()
    }
}
