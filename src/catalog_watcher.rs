use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::jitter;
use crate::catalog::Catalog;
use crate::types::ServiceTags;
use crate::watch::BlockingQuery;

/// Long-polls the catalog's service listing and hands every changed listing
/// to each subscriber, in order.
///
/// Sending waits for room in the subscriber's channel, so a slow subscriber
/// holds the watcher back instead of losing listings.
pub struct CatalogWatcher {
    catalog: Arc<dyn Catalog>,
    subscribers: Vec<mpsc::Sender<Arc<ServiceTags>>>,
    query: BlockingQuery,
    retry_base: Duration,
    token: CancellationToken,
}

impl CatalogWatcher {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        subscribers: Vec<mpsc::Sender<Arc<ServiceTags>>>,
        query: BlockingQuery,
        retry_base: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            subscribers,
            query,
            retry_base,
            token,
        }
    }

    pub async fn run(mut self) {
        info!("starting catalog watcher");

        'poll: while !self.subscribers.is_empty() {
            let opts = self.query.options();
            debug!(index = opts.wait_index, "reading services");
            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                r = self.catalog.list_service_names(&opts) => r,
            };

            let (meta, services) = match result {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "reading services failed");
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(jitter(self.retry_base)) => continue,
                    }
                }
            };

            if !self.query.advance(meta.last_index) {
                debug!(index = meta.last_index, "read services (no changes)");
                continue;
            }
            info!(
                index = meta.last_index,
                services = services.len(),
                "read services (with changes)"
            );

            let services = Arc::new(services);
            let mut closed = vec![];
            for (i, tx) in self.subscribers.iter().enumerate() {
                let sent = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => break 'poll,
                    r = tx.send(services.clone()) => r,
                };
                if sent.is_err() {
                    closed.push(i);
                }
            }
            for i in closed.into_iter().rev() {
                warn!("service set subscriber went away");
                self.subscribers.remove(i);
            }
        }

        info!("catalog watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::QueryMeta;
    use crate::test_utils::{service_tags, unavailable, FakeCatalog};

    fn watcher(
        catalog: Arc<FakeCatalog>,
        subscribers: Vec<mpsc::Sender<Arc<ServiceTags>>>,
        token: CancellationToken,
    ) -> CatalogWatcher {
        CatalogWatcher::new(
            catalog,
            subscribers,
            BlockingQuery::new(Duration::from_secs(300), None, true),
            Duration::from_secs(5),
            token,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_only_changed_listings() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.push_services(Ok((QueryMeta { last_index: 3 }, service_tags(&["api"]))));
        catalog.push_services(Ok((QueryMeta { last_index: 3 }, service_tags(&["api"]))));
        catalog.push_services(Err(unavailable()));
        catalog.push_services(Ok((QueryMeta { last_index: 5 }, service_tags(&["api", "worker"]))));

        let (tx, mut rx) = mpsc::channel(10);
        let token = CancellationToken::new();
        let handle = tokio::spawn(watcher(catalog.clone(), vec![tx], token.clone()).run());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.keys().collect::<Vec<_>>(), vec!["api"]);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.keys().collect::<Vec<_>>(), vec!["api", "worker"]);

        let indexes: Vec<_> = catalog.service_calls().iter().map(|c| c.wait_index).collect();
        assert_eq!(&indexes[..4], &[0, 3, 3, 3]);

        token.cancel();
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn fans_out_to_every_subscriber() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.push_services(Ok((QueryMeta { last_index: 1 }, service_tags(&["api"]))));

        let (tx1, mut rx1) = mpsc::channel(10);
        let (tx2, mut rx2) = mpsc::channel(10);
        let token = CancellationToken::new();
        let handle = tokio::spawn(watcher(catalog, vec![tx1, tx2], token.clone()).run());

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_on_full_channel_without_dropping() {
        let catalog = Arc::new(FakeCatalog::new());
        for i in 1..=4 {
            catalog.push_services(Ok((QueryMeta { last_index: i }, service_tags(&["api"]))));
        }

        let (tx, mut rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let handle = tokio::spawn(watcher(catalog.clone(), vec![tx], token.clone()).run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        // one listing buffered, one send in flight
        assert_eq!(catalog.service_calls().len(), 2);

        let mut received = 0;
        while received < 4 {
            rx.recv().await.unwrap();
            received += 1;
        }
        assert_eq!(received, 4);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_blocked_on_send() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.push_services(Ok((QueryMeta { last_index: 1 }, service_tags(&["api"]))));
        catalog.push_services(Ok((QueryMeta { last_index: 2 }, service_tags(&["api", "worker"]))));

        let (tx, mut rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let handle = tokio::spawn(watcher(catalog.clone(), vec![tx], token.clone()).run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(catalog.service_calls().len(), 2);

        token.cancel();
        handle.await.unwrap();

        assert_eq!(rx.recv().await.unwrap().len(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_all_subscribers_are_gone() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.push_services(Ok((QueryMeta { last_index: 1 }, service_tags(&["api"]))));

        let (tx, rx) = mpsc::channel(10);
        drop(rx);
        let handle = tokio::spawn(watcher(catalog, vec![tx], CancellationToken::new()).run());
        handle.await.unwrap();
    }
}
