//! Concurrent, order-preserving resolution of requests.
//!
//! The pipeline runs blocking [`Resolver`] calls on a bounded pool of
//! worker threads, so that slow backends never stall the async scheduler or
//! other sessions.
//!
//! Collections are listed first. Every listed item becomes a pending
//! [`Entry`] right away, in collection order, and is then enriched in the
//! background. Enrichment of all items overlaps and finishes in any order;
//! consumers that want collection order wait on each entry's readiness
//! signal in turn.
//!
//! # Example
//!
//! ```rust,no_run
//! let collection = pipeline.collection(locator, None, cancel).await?;
//! for entry in &collection.entries {
//!     if entry.ready().await.is_ready() {
//!         queue.append(entry.clone());
//!     }
//! }
//! ```

use std::{collections::HashSet, fmt, num::NonZeroUsize, sync::Arc, time::Duration};

use futures_util::{stream, StreamExt};
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ResolverConfig,
    entry::{Entry, EntryId, Locator, Promise, Stub},
    error::{Error, Result},
    resolver::{Kind, Listing, Resolver},
};

/// An album, playlist or multi-result search whose entries are being
/// resolved.
#[derive(Clone, Debug)]
pub struct Collection {
    pub title: String,
    pub locator: Locator,

    /// Entries in collection order, pending until enriched.
    pub entries: Vec<Entry>,
}

impl Collection {
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary {
            title: self.title.clone(),
            locator: self.locator.clone(),
            count: self.entries.len(),
        }
    }
}

/// What to tell the user right after a collection was requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub title: String,
    pub locator: Locator,
    pub count: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} entries)", self.title, self.count)
    }
}

#[derive(Clone)]
pub struct Pipeline {
    resolver: Arc<dyn Resolver>,
    workers: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        resolver: Arc<dyn Resolver>,
        workers: NonZeroUsize,
        timeout: Option<Duration>,
    ) -> Self {
        debug!("resolver pool with {workers} workers, timeout {timeout:?}");
        Self {
            resolver,
            workers: Arc::new(Semaphore::new(workers.get())),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(resolver: Arc<dyn Resolver>, config: &ResolverConfig) -> Self {
        Self::new(resolver, config.workers, config.timeout())
    }

    #[must_use]
    pub fn classify(&self, locator: &Locator) -> Kind {
        self.resolver.classify(locator)
    }

    /// Runs a blocking resolver call on the worker pool, within the
    /// configured deadline.
    ///
    /// A call that misses its deadline keeps its worker until the resolver
    /// returns, so the pool bound holds even for stuck backends.
    async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Resolver) -> Result<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.workers).acquire_owned().await?;
        let resolver = Arc::clone(&self.resolver);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job(resolver.as_ref())
        });

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, task).await??,
            None => task.await?,
        }
    }

    /// Resolves a single request into a ready entry.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error, or `DeadlineExceeded` on timeout.
    pub async fn single(&self, locator: Locator, requester: Option<String>) -> Result<Entry> {
        let (stub, resolved) = self
            .run(move |resolver| resolver.resolve_single(&locator))
            .await?;
        Ok(Entry::resolved(stub, resolved, requester))
    }

    /// Lists a collection without resolving its items.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error, or `DeadlineExceeded` on timeout.
    pub async fn listing(&self, locator: Locator) -> Result<Listing> {
        self.run(move |resolver| resolver.resolve_collection(&locator))
            .await
    }

    /// Identifiers of everything a query lists, for removal by search.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error, or `DeadlineExceeded` on timeout.
    pub async fn ids(&self, locator: Locator) -> Result<HashSet<EntryId>> {
        let listing = self.listing(locator).await?;
        Ok(listing.items.into_iter().map(|stub| stub.id).collect())
    }

    /// Lists a collection and starts enriching its entries in the background.
    ///
    /// Returns as soon as the listing is known. Enrichment stops when
    /// `cancel` fires; entries not resolved by then are marked failed.
    ///
    /// # Errors
    ///
    /// Returns an error when the collection cannot be listed or is empty.
    pub async fn collection(
        &self,
        locator: Locator,
        requester: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Collection> {
        let listing = self.listing(locator).await?;
        if listing.items.is_empty() {
            return Err(Error::resolution_failure(format!(
                "{} has no playable entries",
                listing.locator
            )));
        }

        let mut entries = Vec::with_capacity(listing.items.len());
        let mut pending = Vec::with_capacity(listing.items.len());
        for stub in listing.items {
            let (entry, promise) = Entry::pending(stub.clone(), requester.clone());
            entries.push(entry);
            pending.push((stub, promise));
        }

        debug!("listed {} with {} entries", listing.title, entries.len());
        self.begin_enrichment(pending, cancel);

        Ok(Collection {
            title: listing.title,
            locator: listing.locator,
            entries,
        })
    }

    /// Resolves every pending entry concurrently, settling each promise
    /// exactly once. A failing entry is logged and marked failed without
    /// affecting its siblings.
    pub fn begin_enrichment(
        &self,
        pending: Vec<(Stub, Promise)>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let count = pending.len();
            let enrich_all = stream::iter(pending).for_each_concurrent(None, |(stub, promise)| {
                let pipeline = pipeline.clone();
                async move {
                    let title = stub.title.clone();
                    match pipeline.run(move |resolver| resolver.enrich(&stub)).await {
                        Ok(resolved) => promise.fulfill(resolved),
                        Err(e) => {
                            warn!("could not resolve {title}: {e}");
                            promise.fail(e);
                        }
                    }
                }
            });

            tokio::select! {
                () = cancel.cancelled() => debug!("enrichment of {count} entries cancelled"),
                () = enrich_all => trace!("enrichment of {count} entries done"),
            }
        })
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("available_workers", &self.workers.available_permits())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        thread,
    };

    use super::*;
    use crate::entry::{
        tests::{resolved, stub},
        Resolved, Status,
    };

    /// Lists `count` items; item `n` takes longer the earlier it is listed,
    /// so they complete in reverse order. Items named in `broken` fail.
    struct SlowResolver {
        count: usize,
        step: Duration,
        broken: Vec<&'static str>,
        completed: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowResolver {
        fn new(count: usize, step: Duration) -> Self {
            Self {
                count,
                step,
                broken: Vec::new(),
                completed: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl Resolver for SlowResolver {
        fn resolve_single(&self, locator: &Locator) -> Result<(Stub, Resolved)> {
            Ok((stub(&locator.to_string()), resolved(1)))
        }

        fn resolve_collection(&self, locator: &Locator) -> Result<Listing> {
            Ok(Listing {
                title: "Reversed".to_owned(),
                locator: locator.clone(),
                items: (1..=self.count).map(|n| stub(&n.to_string())).collect(),
            })
        }

        fn enrich(&self, stub: &Stub) -> Result<Resolved> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);

            let n: u32 = stub.id.as_str().parse().unwrap();
            let count = u32::try_from(self.count).unwrap();
            thread::sleep(self.step * (count + 1 - n));

            self.running.fetch_sub(1, Ordering::SeqCst);
            self.completed.lock().unwrap().push(stub.id.to_string());

            if self.broken.contains(&stub.id.as_str()) {
                return Err(Error::resolution_failure("video unavailable"));
            }
            Ok(resolved(u64::from(n)))
        }
    }

    fn pipeline(resolver: &Arc<SlowResolver>, workers: usize) -> Pipeline {
        let resolver: Arc<dyn Resolver> = resolver.clone();
        Pipeline::new(resolver, NonZeroUsize::new(workers).unwrap(), None)
    }

    fn locator() -> Locator {
        Locator::parse("https://music.example/playlist/1")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waits_in_collection_order_despite_reverse_completion() {
        let resolver = Arc::new(SlowResolver::new(5, Duration::from_millis(60)));
        let pipeline = pipeline(&resolver, 5);

        let collection = pipeline
            .collection(locator(), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(collection.summary().count, 5);
        assert!(collection.entries.iter().all(|entry| !entry.is_ready()));

        let mut order = Vec::new();
        for entry in &collection.entries {
            assert!(entry.ready().await.is_ready());
            order.push(entry.id().to_string());
        }

        assert_eq!(order, ["1", "2", "3", "4", "5"]);
        assert_eq!(resolver.completed.lock().unwrap().first().unwrap(), "5");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_are_isolated() {
        let mut resolver = SlowResolver::new(4, Duration::from_millis(5));
        resolver.broken = vec!["2"];
        let resolver = Arc::new(resolver);
        let pipeline = pipeline(&resolver, 4);

        let collection = pipeline
            .collection(locator(), None, CancellationToken::new())
            .await
            .unwrap();

        let mut statuses = Vec::new();
        for entry in &collection.entries {
            statuses.push(entry.ready().await);
        }
        assert!(statuses[0].is_ready());
        assert!(matches!(statuses[1], Status::Failed(_)));
        assert!(statuses[2].is_ready());
        assert!(statuses[3].is_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_pool_is_bounded() {
        let resolver = Arc::new(SlowResolver::new(6, Duration::from_millis(10)));
        let pipeline = pipeline(&resolver, 2);

        let collection = pipeline
            .collection(locator(), None, CancellationToken::new())
            .await
            .unwrap();
        for entry in &collection.entries {
            entry.ready().await;
        }

        assert!(resolver.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(resolver.completed.lock().unwrap().len(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeouts_fail_only_the_slow_entry() {
        let resolver: Arc<dyn Resolver> = Arc::new(SlowResolver::new(3, Duration::from_millis(200)));
        let pipeline = Pipeline::new(
            resolver,
            NonZeroUsize::new(3).unwrap(),
            Some(Duration::from_millis(500)),
        );

        let collection = pipeline
            .collection(locator(), None, CancellationToken::new())
            .await
            .unwrap();

        // Item 1 sleeps 600ms, items 2 and 3 sleep 400ms and 200ms.
        assert!(matches!(collection.entries[0].ready().await, Status::Failed(_)));
        assert!(collection.entries[1].ready().await.is_ready());
        assert!(collection.entries[2].ready().await.is_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_fails_unresolved_entries() {
        let resolver = Arc::new(SlowResolver::new(3, Duration::from_millis(200)));
        let pipeline = pipeline(&resolver, 1);
        let cancel = CancellationToken::new();

        let collection = pipeline
            .collection(locator(), None, cancel.clone())
            .await
            .unwrap();
        cancel.cancel();

        for entry in &collection.entries {
            assert!(matches!(entry.ready().await, Status::Failed(_)));
        }
    }

    #[tokio::test]
    async fn single_requests_are_ready() {
        let resolver = Arc::new(SlowResolver::new(0, Duration::ZERO));
        let pipeline = pipeline(&resolver, 1);

        let entry = pipeline
            .single(Locator::parse("some song"), Some("dj".to_owned()))
            .await
            .unwrap();
        assert!(entry.is_ready());
        assert_eq!(entry.requester(), Some("dj"));

        let err = pipeline.collection(locator(), None, CancellationToken::new()).await;
        assert_eq!(err.unwrap_err().kind, crate::error::ErrorKind::ResolutionFailure);
    }
}
