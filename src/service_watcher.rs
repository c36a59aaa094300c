use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::jitter;
use crate::cache::{ResponseCache, WatcherId};
use crate::catalog::Catalog;
use crate::resolve::{resolve_entries, Resolver};
use crate::watch::BlockingQuery;

/// Keeps the endpoint list of one service current.
///
/// The watcher is the only writer of its service's cache slot and clears the
/// slot when cancelled.
pub struct ServiceWatcher {
    id: WatcherId,
    service: String,
    catalog: Arc<dyn Catalog>,
    resolver: Arc<dyn Resolver>,
    cache: Arc<ResponseCache>,
    query: BlockingQuery,
    retry_base: Duration,
    token: CancellationToken,
}

impl ServiceWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WatcherId,
        service: String,
        catalog: Arc<dyn Catalog>,
        resolver: Arc<dyn Resolver>,
        cache: Arc<ResponseCache>,
        query: BlockingQuery,
        retry_base: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            service,
            catalog,
            resolver,
            cache,
            query,
            retry_base,
            token,
        }
    }

    pub async fn run(mut self) {
        info!(service = %self.service, watcher = self.id, "starting service watcher");

        loop {
            let opts = self.query.options();
            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                r = self.catalog.service_health(&self.service, &opts) => r,
            };

            let (meta, entries) = match result {
                Ok(v) => v,
                Err(e) => {
                    warn!(service = %self.service, error = %e, "reading service health failed");
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(jitter(self.retry_base)) => continue,
                    }
                }
            };

            if !self.query.advance(meta.last_index) {
                debug!(
                    service = %self.service,
                    index = meta.last_index,
                    "read service health (no changes)"
                );
                continue;
            }
            debug!(
                service = %self.service,
                index = meta.last_index,
                instances = entries.len(),
                "read service health (with changes)"
            );

            let hosts = resolve_entries(self.resolver.as_ref(), &entries).await;
            if self.token.is_cancelled() {
                break;
            }
            self.cache.store_endpoints(&self.service, self.id, hosts);
        }

        self.cache.remove_endpoints(&self.service, self.id);
        info!(service = %self.service, watcher = self.id, "service watcher stopped");
    }
}
