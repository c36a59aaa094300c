use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::catalog::Catalog;
use crate::catalog_watcher::CatalogWatcher;
use crate::config::Settings;
use crate::reconciler::Reconciler;
use crate::resolve::Resolver;
use crate::watch::BlockingQuery;

/// Running catalog watcher and reconciler together with the cache they fill.
///
/// Everything the tasks share is owned here and handed to them at spawn time.
pub struct Engine {
    cache: Arc<ResponseCache>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Spawns the watch tasks on the current runtime. `domain` is the Consul
    /// DNS domain used for virtual host names.
    pub fn start(
        catalog: Arc<dyn Catalog>,
        resolver: Arc<dyn Resolver>,
        settings: Arc<Settings>,
        domain: String,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new());
        let token = CancellationToken::new();
        let watch = &settings.watch;

        let (services_tx, services_rx) = mpsc::channel(watch.channel_capacity);
        let watcher = CatalogWatcher::new(
            catalog.clone(),
            vec![services_tx],
            BlockingQuery::new(
                watch.wait_time(),
                settings.consul.datacenter.clone(),
                watch.allow_stale,
            ),
            watch.retry_base(),
            token.child_token(),
        );
        let reconciler = Reconciler::new(
            catalog,
            resolver,
            cache.clone(),
            settings.clone(),
            domain,
            token.child_token(),
        );

        let tasks = vec![
            tokio::spawn(watcher.run()),
            tokio::spawn(reconciler.run(services_rx)),
        ];
        info!("engine started");

        Self { cache, token, tasks }
    }

    pub fn cache(&self) -> Arc<ResponseCache> {
        self.cache.clone()
    }

    /// Token cancelled by [`Engine::shutdown`]; other components may stop on it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stops all watchers and waits until their cache slots are cleared.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }
        info!("engine stopped");
    }
}
