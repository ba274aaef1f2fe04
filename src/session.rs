//! A playback session: one queue, one history and one driver bound to one
//! audio sink.
//!
//! Every control operation applies its change synchronously under the
//! session locks and returns an explicit outcome; the driver reacts at its
//! next suspension point. See the [`driver`](crate::driver) module for the
//! command protocol.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo(session: &jukebox::session::Session) -> jukebox::error::Result<()> {
//! use jukebox::session::Queued;
//!
//! session.start()?;
//! match session.play("never gonna give you up", false, Some("rick")).await? {
//!     Queued::Entry { entry, position } => println!("{entry} queued at {position}"),
//!     Queued::Collection(feed) => println!("queueing {}", feed.summary),
//! }
//! session.pause()?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashSet,
    fmt,
    sync::{atomic::Ordering, Arc, Mutex},
};

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, Removal},
    driver::{Command, Driver, Shared, State},
    entry::{Entry, EntryId, Locator, Status},
    error::{Error, Result},
    events::Event,
    history::History,
    pipeline::{Collection, Pipeline, Summary},
    queue::Page,
    recorder::{self, Recorder},
    registry::SessionId,
    resolver::Kind,
    sink::{Connector, SinkGuard},
    util::lock,
};

/// Collaborators shared by every session of a registry.
pub(crate) struct Context {
    pub(crate) config: Config,
    pub(crate) pipeline: Pipeline,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) recorder: Option<Arc<dyn Recorder>>,
}

/// What a `play` request put into the queue.
#[derive(Debug)]
pub enum Queued {
    /// A resolved entry and the 1-based position it landed on.
    Entry { entry: Entry, position: usize },

    /// A collection that is being fed into the queue in the background.
    Collection(Feed),
}

/// Handle to a collection being fed into the queue.
#[derive(Debug)]
pub struct Feed {
    pub summary: Summary,
    task: JoinHandle<FeedReport>,
}

/// Outcome of feeding a collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedReport {
    /// Entries that went into the queue.
    pub enqueued: usize,

    /// Entries skipped because they could not be resolved.
    pub failed: usize,

    /// Whether feeding stopped early because of a stop or leave.
    pub cancelled: bool,
}

impl Feed {
    /// Waits until every entry of the collection was either queued or
    /// skipped.
    pub async fn finished(self) -> FeedReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!("feeding {} crashed: {e}", self.summary.title);
                FeedReport {
                    cancelled: true,
                    ..FeedReport::default()
                }
            }
        }
    }
}

impl fmt::Display for FeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} queued, {} unavailable", self.enqueued, self.failed)?;
        if self.cancelled {
            write!(f, ", cancelled")?;
        }
        Ok(())
    }
}

struct Running {
    task: JoinHandle<()>,
}

pub struct Session {
    id: SessionId,
    shared: Arc<Shared>,
    context: Arc<Context>,

    /// Parent of everything the session spawns.
    cancel: CancellationToken,

    /// Parent of collection feeds and their enrichment; replaced on stop.
    feeds: Mutex<CancellationToken>,

    driver: Mutex<Option<Running>>,
}

impl Session {
    pub(crate) fn new(id: SessionId, context: Arc<Context>) -> Self {
        let history = History::new(context.config.queue.history_limit());
        let cancel = CancellationToken::new();
        let feeds = cancel.child_token();
        Self {
            id,
            shared: Arc::new(Shared::new(history)),
            context,
            cancel,
            feeds: Mutex::new(feeds),
            driver: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Connects a sink and starts the playback driver.
    ///
    /// Returns `false` when a driver is already running. A driver that gave
    /// up after repeated sink failures is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error when the session has ended or no sink can be
    /// connected.
    pub fn start(&self) -> Result<bool> {
        let mut driver = lock(&self.driver);
        if driver
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
        {
            return Ok(false);
        }
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled(format!("session {} has ended", self.id)));
        }

        let sink = SinkGuard::new(self.context.connector.connect(self.id)?);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared.playback).commands = Some(tx);

        let task = tokio::spawn(
            Driver::new(
                self.id,
                Arc::clone(&self.shared),
                sink,
                rx,
                self.cancel.child_token(),
                self.context.config.playback.max_sink_failures,
            )
            .run(),
        );
        *driver = Some(Running { task });

        info!("session {} joined", self.id);
        Ok(true)
    }

    /// Whether a driver is running with a connected sink.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.driver)
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Cancels the driver and all feeds, waits for the sink to be released
    /// and drops the queue. The session cannot be started again.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();

        let running = lock(&self.driver).take();
        if let Some(running) = running {
            if let Err(e) = running.task.await {
                error!("driver of session {} crashed: {e}", self.id);
            }
        }

        lock(&self.shared.queue).clear();
        info!("session {} left", self.id);
    }

    /// Resolves a request and queues the result: a single entry right away,
    /// a collection in the background.
    ///
    /// # Errors
    ///
    /// Returns an error when the input is empty, resolution fails or the
    /// resolved entry is unplayable.
    pub async fn play(
        &self,
        query: &str,
        play_next: bool,
        requester: Option<&str>,
    ) -> Result<Queued> {
        let locator: Locator = query.parse()?;
        let requester = requester.map(ToOwned::to_owned);
        let pipeline = &self.context.pipeline;

        match pipeline.classify(&locator) {
            Kind::Single => {
                let entry = pipeline.single(locator, requester).await?;
                let position = self.enqueue(entry.clone(), play_next)?;
                Ok(Queued::Entry { entry, position })
            }
            Kind::Collection => {
                // A stop while listing also ends the feed.
                let cancel = lock(&self.feeds).child_token();
                let collection = pipeline
                    .collection(locator, requester, cancel.clone())
                    .await?;
                Ok(Queued::Collection(self.feed(collection, play_next, cancel)))
            }
        }
    }

    /// Queues a resolved entry at the tail, or at the head with `play_next`.
    /// Returns its 1-based position.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry is unresolved or failed to resolve.
    pub fn enqueue(&self, entry: Entry, play_next: bool) -> Result<usize> {
        match entry.status() {
            Status::Ready(_) => {}
            Status::Pending => {
                return Err(Error::invalid_state(format!("{entry} is not resolved yet")))
            }
            Status::Failed(reason) => return Err(Error::resolution_failure(reason.to_string())),
        }

        self.record(&entry);
        let position = {
            let mut queue = lock(&self.shared.queue);
            if play_next {
                queue.prepend(entry.clone());
                1
            } else {
                queue.append(entry.clone());
                queue.len()
            }
        };
        self.shared.wake.notify_one();

        debug!("session {} queued {entry} at {position}", self.id);
        Ok(position)
    }

    /// Feeds a collection into the queue in collection order, each entry as
    /// soon as it and all entries before it have settled. Unresolvable
    /// entries are skipped and counted.
    ///
    /// With `play_next`, the collection goes in front of the queue, still in
    /// collection order.
    pub fn start_collection(&self, collection: Collection, play_next: bool) -> Feed {
        let cancel = lock(&self.feeds).child_token();
        self.feed(collection, play_next, cancel)
    }

    fn feed(&self, collection: Collection, play_next: bool, cancel: CancellationToken) -> Feed {
        let summary = collection.summary();
        let session = self.id;
        let shared = Arc::clone(&self.shared);
        let recorder = self.context.recorder.clone();
        let Collection { title, entries, .. } = collection;

        let task = tokio::spawn(async move {
            let mut report = FeedReport::default();
            let mut anchor: Option<Entry> = None;

            for entry in entries {
                let status = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    status = entry.ready() => Some(status),
                };
                let Some(status) = status else {
                    report.cancelled = true;
                    break;
                };

                if let Status::Failed(reason) = status {
                    warn!("skipping {entry} of {title}: {reason}");
                    report.failed += 1;
                    continue;
                }

                if let Some(recorder) = &recorder {
                    recorder::record_in_background(recorder, session, &entry);
                }
                {
                    let mut queue = lock(&shared.queue);
                    if play_next {
                        queue.insert_after(anchor.as_ref(), entry.clone());
                    } else {
                        queue.append(entry.clone());
                    }
                }
                shared.wake.notify_one();

                anchor = Some(entry);
                report.enqueued += 1;
            }

            info!("session {session} finished processing {title}: {report}");
            report
        });

        Feed { summary, task }
    }

    /// # Errors
    ///
    /// Returns [`InvalidState`](crate::error::ErrorKind::InvalidState) unless
    /// an entry is playing.
    pub fn pause(&self) -> Result<()> {
        let mut playback = lock(&self.shared.playback);
        match playback.state {
            State::Playing => {}
            State::Paused => return Err(Error::invalid_state("already paused")),
            State::Idle | State::Stopped => return Err(Error::invalid_state("nothing is playing")),
        }

        playback.state = State::Paused;
        playback.post(Command::Pause);
        debug!("session {} pausing", self.id);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`InvalidState`](crate::error::ErrorKind::InvalidState) unless
    /// an entry is paused.
    pub fn resume(&self) -> Result<()> {
        let mut playback = lock(&self.shared.playback);
        match playback.state {
            State::Paused => {}
            State::Playing => return Err(Error::invalid_state("already playing")),
            State::Idle | State::Stopped => return Err(Error::invalid_state("nothing is paused")),
        }

        playback.state = State::Playing;
        playback.post(Command::Resume);
        debug!("session {} resuming", self.id);
        Ok(())
    }

    /// Halts playback, discards the current entry without recording it in
    /// the history, clears the queue and stops feeding collections.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidState`](crate::error::ErrorKind::InvalidState) when
    /// nothing is playing and the queue is empty.
    pub fn stop(&self) -> Result<()> {
        {
            let mut playback = lock(&self.shared.playback);
            let mut queue = lock(&self.shared.queue);
            if playback.current.is_none() && queue.is_empty() {
                return Err(Error::invalid_state("nothing is playing"));
            }

            queue.clear();
            if playback.current.take().is_some() {
                playback.post(Command::Halt);
            }
            playback.state = State::Stopped;
        }

        let mut feeds = lock(&self.feeds);
        feeds.cancel();
        *feeds = self.cancel.child_token();

        debug!("session {} stopped", self.id);
        Ok(())
    }

    /// Halts the current entry. Forward, the entry goes to the history and
    /// the next one starts; the halted entry is returned. Back, the most
    /// recent history entry is put in front of the queue and returned, and
    /// the halted entry is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidState`](crate::error::ErrorKind::InvalidState) when
    /// nothing is playing, or when going back with an empty history.
    pub fn skip(&self, back: bool) -> Result<Entry> {
        let mut playback = lock(&self.shared.playback);
        if back {
            let mut queue = lock(&self.shared.queue);
            let mut history = lock(&self.shared.history);
            if playback.current.is_none() {
                return Err(Error::invalid_state("nothing is playing"));
            }
            let previous = history
                .pop()
                .ok_or_else(|| Error::invalid_state("nothing to go back to"))?;

            queue.prepend(previous.clone());
            playback.current = None;
            playback.state = State::Idle;
            playback.post(Command::Halt);

            debug!("session {} going back to {previous}", self.id);
            Ok(previous)
        } else {
            let current = playback
                .current
                .take()
                .ok_or_else(|| Error::invalid_state("nothing is playing"))?;

            lock(&self.shared.history).push(current.clone());
            playback.state = State::Idle;
            playback.post(Command::Halt);

            debug!("session {} skipped {current}", self.id);
            Ok(current)
        }
    }

    /// Flips queue looping and returns the new setting.
    pub fn toggle_loop(&self) -> bool {
        let looping = !self.shared.looping.fetch_xor(true, Ordering::SeqCst);
        debug!("session {} looping: {looping}", self.id);
        looping
    }

    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.shared.looping.load(Ordering::SeqCst)
    }

    /// Shuffles the queue and returns its length.
    pub fn shuffle(&self) -> usize {
        let mut queue = lock(&self.shared.queue);
        queue.shuffle();
        queue.len()
    }

    /// Removes the entry at a 1-based position.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`](crate::error::ErrorKind::OutOfRange) when there
    /// is no such position.
    pub fn remove_at(&self, position: usize) -> Result<Entry> {
        lock(&self.shared.queue).remove_at(position)
    }

    /// Removes the first queued entry with an identifier in `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) when nothing
    /// matches.
    pub fn remove_matching(&self, ids: &HashSet<EntryId>) -> Result<Entry> {
        lock(&self.shared.queue)
            .remove_matching(ids)
            .ok_or_else(|| Error::not_found("no such entry in the queue"))
    }

    /// Removes every queued entry with an identifier in `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) when nothing
    /// matches.
    pub fn remove_all_matching(&self, ids: &HashSet<EntryId>) -> Result<Vec<Entry>> {
        let removed = lock(&self.shared.queue).remove_all_matching(ids);
        if removed.is_empty() {
            return Err(Error::not_found("no such entry in the queue"));
        }
        Ok(removed)
    }

    /// Looks `query` up and removes what it identifies from the queue: the
    /// first match, or all of them, as configured.
    ///
    /// # Errors
    ///
    /// Returns an error when the lookup fails or nothing matches.
    pub async fn remove_by_query(&self, query: &str) -> Result<Vec<Entry>> {
        let locator: Locator = query.parse()?;
        let ids = self.context.pipeline.ids(locator).await?;
        match self.context.config.queue.removal {
            Removal::First => self.remove_matching(&ids).map(|entry| vec![entry]),
            Removal::All => self.remove_all_matching(&ids),
        }
    }

    /// Empties the queue and returns how many entries it held. The current
    /// entry keeps playing.
    pub fn clear(&self) -> usize {
        let mut queue = lock(&self.shared.queue);
        let len = queue.len();
        queue.clear();
        len
    }

    #[must_use]
    pub fn current(&self) -> Option<Entry> {
        lock(&self.shared.playback).current.clone()
    }

    #[must_use]
    pub fn state(&self) -> State {
        lock(&self.shared.playback).state
    }

    /// One page of the queue; page numbers start at 1.
    #[must_use]
    pub fn queue_page(&self, page: usize) -> Page {
        lock(&self.shared.queue).page(page, self.context.config.queue.page_size)
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        lock(&self.shared.history).len()
    }

    /// Subscribes to the events of this session's driver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.subscribe()
    }

    fn record(&self, entry: &Entry) {
        if let Some(recorder) = &self.context.recorder {
            recorder::record_in_background(recorder, self.id, entry);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("queue", &self.queue_len())
            .field("looping", &self.is_looping())
            .finish_non_exhaustive()
    }
}
