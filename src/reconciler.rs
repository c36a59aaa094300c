use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{ResponseCache, WatcherId};
use crate::catalog::Catalog;
use crate::config::Settings;
use crate::resolve::Resolver;
use crate::service_watcher::ServiceWatcher;
use crate::translate::{build_clusters, build_routes};
use crate::types::ServiceTags;
use crate::watch::BlockingQuery;

struct Tracked {
    id: WatcherId,
    last_seen: Instant,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A service watcher cancelled by [`Reconciler::sweep`].
#[derive(Debug)]
pub struct Retired {
    pub service: String,
    pub handle: JoinHandle<()>,
}

impl Retired {
    /// Waits for the watcher to exit. Returns false if it panicked or was
    /// aborted.
    pub async fn join(self) -> bool {
        match self.handle.await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    service = %self.service,
                    error = %e,
                    "retired service watcher ended abnormally"
                );
                false
            }
        }
    }
}

/// Turns service listings into service watcher lifecycles and cluster/route
/// snapshots.
///
/// Watchers are started the first time a service is listed and cancelled
/// only once the service has been missing from every listing for longer than
/// the retirement threshold, so a flapping catalog does not churn them.
pub struct Reconciler {
    catalog: Arc<dyn Catalog>,
    resolver: Arc<dyn Resolver>,
    cache: Arc<ResponseCache>,
    settings: Arc<Settings>,
    domain: String,
    running: HashMap<String, Tracked>,
    next_id: WatcherId,
    token: CancellationToken,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        resolver: Arc<dyn Resolver>,
        cache: Arc<ResponseCache>,
        settings: Arc<Settings>,
        domain: String,
        token: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            resolver,
            cache,
            settings,
            domain,
            running: HashMap::new(),
            next_id: 0,
            token,
        }
    }

    pub fn is_tracking(&self, service: &str) -> bool {
        self.running.contains_key(service)
    }

    pub fn tracked_count(&self) -> usize {
        self.running.len()
    }

    pub fn last_seen(&self, service: &str) -> Option<Instant> {
        self.running.get(service).map(|t| t.last_seen)
    }

    fn spawn_watcher(&mut self, service: &str, now: Instant) {
        self.next_id += 1;
        let id = self.next_id;
        let token = self.token.child_token();
        let watch = &self.settings.watch;
        let watcher = ServiceWatcher::new(
            id,
            service.to_string(),
            self.catalog.clone(),
            self.resolver.clone(),
            self.cache.clone(),
            BlockingQuery::new(
                watch.wait_time(),
                self.settings.consul.datacenter.clone(),
                watch.allow_stale,
            ),
            watch.retry_base(),
            token.clone(),
        );
        let handle = tokio::spawn(watcher.run());
        self.running.insert(
            service.to_string(),
            Tracked {
                id,
                last_seen: now,
                token,
                handle,
            },
        );
    }

    /// Applies one listing observed at `now`.
    pub fn handle_services(&mut self, services: &ServiceTags, now: Instant) {
        for name in services.keys() {
            match self.running.get_mut(name) {
                Some(tracked) => tracked.last_seen = now,
                None => {
                    info!(service = %name, "discovered new service");
                    self.spawn_watcher(name, now);
                }
            }
        }

        self.cache
            .publish_clusters(build_clusters(services, &self.settings.cluster));
        self.cache
            .publish_routes(build_routes(services, &self.domain, &self.settings.route));
    }

    /// Cancels the watchers of services not seen within the retirement
    /// threshold before `now`.
    pub fn sweep(&mut self, now: Instant) -> Vec<Retired> {
        let retirement = self.settings.watch.retirement();
        let expired: Vec<String> = self
            .running
            .iter()
            .filter(|(_, t)| now.saturating_duration_since(t.last_seen) > retirement)
            .map(|(name, _)| name.clone())
            .collect();

        let mut retired = Vec::with_capacity(expired.len());
        for name in expired {
            if let Some(tracked) = self.running.remove(&name) {
                info!(service = %name, watcher = tracked.id, "retiring service due to timeout");
                tracked.token.cancel();
                retired.push(Retired {
                    service: name,
                    handle: tracked.handle,
                });
            }
        }
        retired
    }

    /// Cancels every watcher and waits for them to clear their slots.
    pub async fn shutdown(&mut self) {
        let handles: Vec<_> = self
            .running
            .drain()
            .map(|(_, tracked)| {
                tracked.token.cancel();
                tracked.handle
            })
            .collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "service watcher ended abnormally");
            }
        }
    }

    /// Handles listings and sweep ticks one at a time until cancelled or the
    /// listing channel closes.
    pub async fn run(mut self, mut services_rx: mpsc::Receiver<Arc<ServiceTags>>) {
        let period = self.settings.watch.sweep_interval();
        let mut cleanup = tokio::time::interval_at(Instant::now() + period, period);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    info!("shutting down reconciler");
                    break;
                }
                _ = cleanup.tick() => {
                    info!(tracked = self.running.len(), "starting cleanup");
                    for retired in self.sweep(Instant::now()) {
                        tokio::spawn(retired.join());
                    }
                }
                services = services_rx.recv() => match services {
                    Some(services) => {
                        info!(services = services.len(), "got services");
                        self.handle_services(&services, Instant::now());
                    }
                    None => {
                        warn!("service set channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }
}
