//! The playback driver: one long-lived task per session that feeds the
//! queue to the sink.
//!
//! Control operations never touch the sink. They change the shared
//! [`Playback`] state under its lock and, when the sink has to act, post a
//! [`Command`] tagged with the epoch of the entry they were aimed at. The
//! driver carries commands out at its next suspension point and drops those
//! whose epoch is stale, e.g. a pause that raced with the end of a track.
//!
//! Lock order, wherever more than one is held: playback, queue, history.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::{
    entry::Entry,
    error::{Error, Result},
    events::Event,
    history::History,
    queue::PlayQueue,
    registry::SessionId,
    sink::{Done, SinkGuard},
    util::lock,
};

/// Playback state of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum State {
    /// Nothing is playing; the driver starts the next entry when one is
    /// queued.
    #[default]
    Idle,
    Playing,
    Paused,
    /// Stopped by request. Behaves like `Idle` otherwise.
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Work for the driver, tagged with the epoch of the entry it concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Pause(u64),
    Resume(u64),
    Halt(u64),
}

#[derive(Debug, Default)]
pub(crate) struct Playback {
    pub(crate) state: State,
    pub(crate) current: Option<Entry>,

    /// Incremented for every entry the driver starts.
    pub(crate) epoch: u64,

    /// Channel to the running driver, if any.
    pub(crate) commands: Option<mpsc::UnboundedSender<Command>>,
}

impl Playback {
    /// Posts a command for the current epoch. Sending under the playback
    /// lock keeps commands in the order of the state changes they belong
    /// to.
    pub(crate) fn post(&self, command: fn(u64) -> Command) {
        if let Some(commands) = &self.commands {
            // A closed channel means the driver is gone, and with it the sink.
            let _ = commands.send(command(self.epoch));
        }
    }
}

/// State shared between a session's control operations and its driver.
pub(crate) struct Shared {
    pub(crate) playback: Mutex<Playback>,
    pub(crate) queue: Mutex<PlayQueue>,
    pub(crate) history: Mutex<History>,
    pub(crate) looping: AtomicBool,

    /// Wakes an idle driver after an enqueue.
    pub(crate) wake: Notify,

    events: broadcast::Sender<Event>,
}

impl Shared {
    const EVENT_CAPACITY: usize = 64;

    pub(crate) fn new(history: History) -> Self {
        let (events, _) = broadcast::channel(Self::EVENT_CAPACITY);
        Self {
            playback: Mutex::new(Playback::default()),
            queue: Mutex::new(PlayQueue::new()),
            history: Mutex::new(history),
            looping: AtomicBool::new(false),
            wake: Notify::new(),
            events,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Pops the next playable entry and makes it current.
    fn advance(&self) -> Option<(Entry, u64)> {
        let mut playback = lock(&self.playback);
        let mut queue = lock(&self.queue);
        while let Some(entry) = queue.pop_front() {
            if !entry.is_ready() {
                warn!("dropping {entry} from the queue: not playable");
                continue;
            }

            playback.epoch += 1;
            playback.current = Some(entry.clone());
            playback.state = State::Playing;
            return Some((entry, playback.epoch));
        }

        None
    }

    /// Retires the entry of `epoch` after it ended by itself: into the
    /// history, and back onto the queue when looping. Returns `None` when a
    /// control operation already took the entry away.
    fn complete(&self, epoch: u64) -> Option<Entry> {
        let mut playback = lock(&self.playback);
        if playback.epoch != epoch {
            return None;
        }
        let entry = playback.current.take()?;
        playback.state = State::Idle;

        if self.looping.load(Ordering::SeqCst) {
            lock(&self.queue).append(entry.clone());
        }
        lock(&self.history).push(entry.clone());

        Some(entry)
    }

    /// Undoes a pause or resume that the sink refused.
    fn revert(&self, epoch: u64, from: State, to: State) {
        let mut playback = lock(&self.playback);
        if playback.epoch == epoch && playback.state == from {
            playback.state = to;
        }
    }

    /// Forgets the driver once it has ended.
    fn release(&self) {
        let mut playback = lock(&self.playback);
        playback.current = None;
        playback.state = State::Idle;
        playback.commands = None;
    }
}

/// How the current entry ended.
enum Outcome {
    Finished,
    Failed(Error),
    Halted,
    Cancelled,
}

/// Returns the session to idle when the driver goes away, however it ends.
struct Release {
    session: SessionId,
    shared: Arc<Shared>,
}

impl Drop for Release {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("driver of session {} panicked", self.session);
        }
        self.shared.release();
        self.shared.emit(Event::Disconnected);
    }
}

pub(crate) struct Driver {
    session: SessionId,
    shared: Arc<Shared>,
    sink: SinkGuard,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    max_failures: u32,
}

impl Driver {
    pub(crate) fn new(
        session: SessionId,
        shared: Arc<Shared>,
        sink: SinkGuard,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
        max_failures: u32,
    ) -> Self {
        Self {
            session,
            shared,
            sink,
            commands,
            cancel,
            max_failures: max_failures.max(1),
        }
    }

    /// Drives playback until cancelled or the sink keeps failing. The shared
    /// state is released and the sink disconnected when this returns, and
    /// also if the task is aborted or panics.
    pub(crate) async fn run(mut self) {
        let _release = Release {
            session: self.session,
            shared: Arc::clone(&self.shared),
        };

        debug!("driver of session {} started", self.session);
        match self.drive().await {
            Ok(()) => debug!("driver of session {} stopped", self.session),
            Err(e) => error!("driver of session {} terminated: {e}", self.session),
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let mut failures = 0;
        loop {
            let Some((entry, epoch)) = self.next().await else {
                return Ok(());
            };

            let outcome = match entry.stream() {
                Some(stream) => match self.sink.start(&stream) {
                    Ok(done) => {
                        info!("session {} playing {entry}", self.session);
                        self.shared.emit(Event::TrackChanged(entry.clone()));
                        self.play(epoch, done).await
                    }
                    Err(e) => Outcome::Failed(e),
                },
                None => Outcome::Failed(Error::internal(format!("{entry} has no stream"))),
            };

            match outcome {
                Outcome::Finished => {
                    failures = 0;
                    if let Some(entry) = self.shared.complete(epoch) {
                        debug!("session {} finished {entry}", self.session);
                        self.shared.emit(Event::Finished(entry));
                    }
                }
                Outcome::Failed(e) => {
                    warn!("session {} failed playing {entry}: {e}", self.session);
                    self.shared.emit(Event::SinkFailed(e.to_string()));
                    if let Some(entry) = self.shared.complete(epoch) {
                        self.shared.emit(Event::Finished(entry));
                    }

                    failures += 1;
                    if failures >= self.max_failures {
                        return Err(e);
                    }
                }
                Outcome::Halted => {
                    failures = 0;
                    self.shared.emit(Event::Halted);
                }
                Outcome::Cancelled => {
                    if let Err(e) = self.sink.stop() {
                        warn!("failed to halt sink of session {}: {e}", self.session);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Waits for a playable entry. Returns `None` when the session ends.
    async fn next(&mut self) -> Option<(Entry, u64)> {
        let mut announced = false;
        loop {
            if let Some(next) = self.shared.advance() {
                return Some(next);
            }

            if !announced {
                debug!("session {} idle", self.session);
                self.shared.emit(Event::Idle);
                announced = true;
            }

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return None,

                () = self.shared.wake.notified() => {}

                command = self.commands.recv() => match command {
                    Some(command) => trace!("ignoring {command:?} while idle"),
                    None => return None,
                },
            }
        }
    }

    /// Plays the entry of `epoch` until it ends or is halted, carrying out
    /// pause and resume commands meanwhile.
    async fn play(&mut self, epoch: u64, mut done: Done) -> Outcome {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return Outcome::Cancelled,

                command = self.commands.recv() => match command {
                    Some(Command::Halt(at)) if at == epoch => {
                        if let Err(e) = self.sink.stop() {
                            warn!("failed to halt sink of session {}: {e}", self.session);
                        }
                        return Outcome::Halted;
                    }
                    Some(Command::Pause(at)) if at == epoch => match self.sink.pause() {
                        Ok(()) => self.shared.emit(Event::Paused),
                        Err(e) => {
                            warn!("failed to pause sink of session {}: {e}", self.session);
                            self.shared.revert(epoch, State::Paused, State::Playing);
                        }
                    },
                    Some(Command::Resume(at)) if at == epoch => match self.sink.resume() {
                        Ok(()) => self.shared.emit(Event::Resumed),
                        Err(e) => {
                            warn!("failed to resume sink of session {}: {e}", self.session);
                            self.shared.revert(epoch, State::Playing, State::Paused);
                        }
                    },
                    Some(command) => trace!("ignoring stale {command:?}"),
                    None => return Outcome::Cancelled,
                },

                result = &mut done => {
                    return match result {
                        Ok(Ok(())) => Outcome::Finished,
                        Ok(Err(e)) => Outcome::Failed(e),
                        Err(_) => Outcome::Failed(Error::sink_failure("sink dropped the stream")),
                    };
                }
            }
        }
    }
}
