//! Playable media entries and their readiness signal.
//!
//! An [`Entry`] is created either already resolved (single requests) or
//! pending (collection requests). A pending entry is paired with exactly one
//! [`Promise`], the single writer of its readiness signal. Consuming the
//! promise settles the entry once and for all; dropping it unsettled marks
//! the entry as failed so that waiters never hang.
//!
//! Until the entry is settled only its identifier, title, artist and locator
//! may be read. [`Entry::duration`] and [`Entry::stream`] return `None` until
//! then.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use tokio::sync::watch;
use url::Url;

use crate::error::Error;

/// Stable identifier of a media item, as assigned by the resolver.
///
/// Identifiers are not unique within a queue: the same item can be queued
/// several times.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(String);

impl EntryId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EntryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a request points to: a link, or free text to search for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Locator {
    Url(Url),
    Search(String),
}

impl Locator {
    /// Classifies user input. Anything without whitespace that parses as an
    /// absolute URL (or URI, like `spotify:album:...`) is a link; the rest is
    /// a search query.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if !input.contains(char::is_whitespace) {
            if let Ok(url) = Url::parse(input) {
                return Self::Url(url);
            }
        }

        Self::Search(input.to_owned())
    }

    #[must_use]
    pub fn as_url(&self) -> Option<&Url> {
        match self {
            Self::Url(url) => Some(url),
            Self::Search(_) => None,
        }
    }

    #[must_use]
    pub fn is_search(&self) -> bool {
        matches!(self, Self::Search(_))
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(Error::invalid_argument("no url or search query provided"));
        }
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::Search(query) => write!(f, "\"{query}\""),
        }
    }
}

/// Handle to the playable stream of a resolved entry, as understood by the
/// audio sink.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StreamHandle(Url);

impl StreamHandle {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self(url)
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data only known once an entry has been resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub duration: Option<Duration>,
    pub stream: StreamHandle,
}

/// Metadata known as soon as an entry exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stub {
    pub id: EntryId,
    pub title: String,
    pub artist: Option<String>,
    pub locator: Locator,
}

/// Resolution state of an entry.
#[derive(Clone, Debug, Default)]
pub enum Status {
    #[default]
    Pending,
    Ready(Arc<Resolved>),
    Failed(Arc<str>),
}

impl Status {
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

#[derive(Debug)]
struct Inner {
    stub: Stub,
    requester: Option<String>,
    status: watch::Receiver<Status>,
}

/// One playable media item.
///
/// Cloning is cheap and clones share the readiness signal. Two clones are
/// the same queue item; compare with [`Entry::same`].
#[derive(Clone, Debug)]
pub struct Entry {
    inner: Arc<Inner>,
}

impl Entry {
    /// Creates an entry that is resolved from the start.
    #[must_use]
    pub fn resolved(stub: Stub, resolved: Resolved, requester: Option<String>) -> Self {
        let (_, status) = watch::channel(Status::Ready(Arc::new(resolved)));
        Self::with_status(stub, requester, status)
    }

    /// Creates a pending entry together with the single writer of its
    /// readiness signal.
    #[must_use]
    pub fn pending(stub: Stub, requester: Option<String>) -> (Self, Promise) {
        let (tx, status) = watch::channel(Status::Pending);
        let entry = Self::with_status(stub, requester, status);
        let promise = Promise {
            id: entry.id().clone(),
            tx: Some(tx),
        };
        (entry, promise)
    }

    fn with_status(stub: Stub, requester: Option<String>, status: watch::Receiver<Status>) -> Self {
        Self {
            inner: Arc::new(Inner {
                stub,
                requester,
                status,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &EntryId {
        &self.inner.stub.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.inner.stub.title
    }

    #[must_use]
    pub fn artist(&self) -> Option<&str> {
        self.inner.stub.artist.as_deref()
    }

    #[must_use]
    pub fn locator(&self) -> &Locator {
        &self.inner.stub.locator
    }

    /// Who asked for this entry, if known.
    #[must_use]
    pub fn requester(&self) -> Option<&str> {
        self.inner.requester.as_deref()
    }

    /// The current resolution state, without waiting.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status.borrow().clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.status.borrow().is_ready()
    }

    /// Duration of the entry. `None` while unresolved, or when the source
    /// does not report one (live streams).
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match &*self.inner.status.borrow() {
            Status::Ready(resolved) => resolved.duration,
            _ => None,
        }
    }

    /// Stream to hand to the sink. `None` unless resolved.
    #[must_use]
    pub fn stream(&self) -> Option<StreamHandle> {
        match &*self.inner.status.borrow() {
            Status::Ready(resolved) => Some(resolved.stream.clone()),
            _ => None,
        }
    }

    /// Waits until the entry is settled, and returns how.
    ///
    /// Returns immediately when the entry was settled before the call.
    pub async fn ready(&self) -> Status {
        let mut status = self.inner.status.clone();
        if let Ok(settled) = status.wait_for(Status::is_settled).await {
            return settled.clone();
        }

        // The promise is gone. It always settles before dropping, so this
        // only observes the value it left behind.
        let last = status.borrow().clone();
        if last.is_settled() {
            last
        } else {
            Status::Failed(Arc::from("resolution abandoned"))
        }
    }

    /// Whether both handles refer to the same queue item, as opposed to two
    /// requests for the same media.
    #[must_use]
    pub fn same(&self, other: &Entry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.artist() {
            Some(artist) => write!(f, "{} by {artist}", self.title()),
            None => write!(f, "{}", self.title()),
        }
    }
}

/// Single writer of an entry's readiness signal.
///
/// Settling consumes the promise, so an entry is settled at most once.
#[derive(Debug)]
pub struct Promise {
    id: EntryId,
    tx: Option<watch::Sender<Status>>,
}

impl Promise {
    /// Identifier of the entry this promise settles.
    #[must_use]
    pub fn id(&self) -> &EntryId {
        &self.id
    }

    /// Marks the entry as resolved.
    pub fn fulfill(mut self, resolved: Resolved) {
        self.settle(Status::Ready(Arc::new(resolved)));
    }

    /// Marks the entry as permanently failed.
    pub fn fail(mut self, reason: impl fmt::Display) {
        self.settle(Status::Failed(Arc::from(reason.to_string())));
    }

    fn settle(&mut self, status: Status) {
        if let Some(tx) = self.tx.take() {
            // `send_replace` stores the value even without any receiver.
            tx.send_replace(status);
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        if self.tx.is_some() {
            trace!("entry {} abandoned before resolution", self.id);
            self.settle(Status::Failed(Arc::from("resolution abandoned")));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn stub(id: &str) -> Stub {
        Stub {
            id: EntryId::from(id),
            title: format!("Title {id}"),
            artist: None,
            locator: Locator::Search(id.to_owned()),
        }
    }

    pub(crate) fn resolved(secs: u64) -> Resolved {
        Resolved {
            duration: Some(Duration::from_secs(secs)),
            stream: StreamHandle::new(Url::parse("https://media.example/stream").unwrap()),
        }
    }

    pub(crate) fn ready(id: &str) -> Entry {
        Entry::resolved(stub(id), resolved(60), None)
    }

    #[test]
    fn locator_classifies_input() {
        assert!(matches!(
            Locator::parse("https://youtube.com/watch?v=abc"),
            Locator::Url(_)
        ));
        assert!(matches!(
            Locator::parse("spotify:album:4aawyAB9vmqN3uQ7FjRGTy"),
            Locator::Url(_)
        ));
        assert_eq!(
            Locator::parse("  never gonna give you up "),
            Locator::Search("never gonna give you up".to_owned())
        );
        assert!("   ".parse::<Locator>().is_err());
    }

    #[test]
    fn pending_entry_hides_resolved_data() {
        let (entry, _promise) = Entry::pending(stub("a"), None);
        assert_eq!(entry.title(), "Title a");
        assert!(entry.duration().is_none());
        assert!(entry.stream().is_none());
        assert!(!entry.status().is_settled());
    }

    #[tokio::test]
    async fn waiters_before_and_after_settling_observe_it() {
        let (entry, promise) = Entry::pending(stub("a"), None);

        let early = entry.clone();
        let waiter = tokio::spawn(async move { early.ready().await });
        tokio::task::yield_now().await;

        promise.fulfill(resolved(5));

        assert!(waiter.await.unwrap().is_ready());
        assert!(entry.ready().await.is_ready());
        assert_eq!(entry.duration(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn dropped_promise_fails_entry() {
        let (entry, promise) = Entry::pending(stub("a"), None);
        drop(promise);
        assert!(matches!(entry.ready().await, Status::Failed(_)));
    }

    #[tokio::test]
    async fn failed_entry_reports_reason() {
        let (entry, promise) = Entry::pending(stub("a"), None);
        promise.fail("video unavailable");
        match entry.ready().await {
            Status::Failed(reason) => assert_eq!(&*reason, "video unavailable"),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn clones_are_the_same_item() {
        let a = ready("a");
        let b = ready("a");
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert_eq!(a.id(), b.id());
    }
}
