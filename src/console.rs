//! Text commands for one session, as typed into the console.
//!
//! Every command answers with a short reply derived from the explicit
//! outcome of the session operation. Messages that arrive later, like "now
//! playing" or the end of a collection, go to the output channel returned
//! by [`Console::new`].

use std::{fmt::Write as _, str::FromStr, sync::Arc};

use tokio::sync::{broadcast::error::RecvError, mpsc};

use crate::{
    entry::Entry,
    error::{Error, ErrorKind, Result},
    events::Event,
    queue::Page,
    registry::{Registry, SessionId},
    session::{Queued, Session},
    util::clock,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
    Play { query: String, next: bool },
    Pause,
    Resume,
    Stop,
    Skip,
    Back,
    Loop,
    Now,
    Queue(usize),
    Shuffle,
    Remove(Target),
    Clear,
    Status,
    Help,
    Quit,
}

/// What to remove from the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Position(usize),
    Query(String),
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (name, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(name, rest)| (name, rest.trim()));

        let command = match name.to_lowercase().as_str() {
            "join" | "summon" => Self::Join,
            "leave" | "disconnect" => Self::Leave,
            "play" | "p" => Self::Play {
                query: argument(rest, "a link or search query")?,
                next: false,
            },
            "playnext" | "pn" => Self::Play {
                query: argument(rest, "a link or search query")?,
                next: true,
            },
            "pause" => Self::Pause,
            "resume" | "unpause" => Self::Resume,
            "stop" => Self::Stop,
            "skip" | "next" => Self::Skip,
            "back" | "previous" => Self::Back,
            "loop" | "repeat" => Self::Loop,
            "now" | "np" | "current" => Self::Now,
            "queue" | "q" => Self::Queue(if rest.is_empty() {
                1
            } else {
                rest.parse().map_err(|_| {
                    Error::invalid_argument(format!("{rest} is not a page number"))
                })?
            }),
            "shuffle" => Self::Shuffle,
            "remove" | "rm" => Self::Remove(match rest.parse() {
                Ok(position) => Target::Position(position),
                Err(_) => Target::Query(argument(rest, "a position or search query")?),
            }),
            "clear" => Self::Clear,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "" => return Err(Error::invalid_argument("type a command, or help")),
            other => return Err(Error::invalid_argument(format!("unknown command {other}"))),
        };

        Ok(command)
    }
}

fn argument(rest: &str, what: &str) -> Result<String> {
    if rest.is_empty() {
        return Err(Error::invalid_argument(format!("expected {what}")));
    }
    Ok(rest.to_owned())
}

const HELP: &str = "\
join                  connect to the channel
leave                 disconnect and forget the queue
play <link|query>     queue a track, album or playlist
playnext <link|query> same, but in front of the queue
pause, resume, stop   control playback
skip, back            next or previous track
loop                  toggle looping the queue
now                   show the current track
queue [page]          show the queue
shuffle, clear        reorder or empty the queue
remove <n|query>      remove a track from the queue
status                show everything at once
quit                  exit";

/// Maps an error onto a reply.
#[must_use]
pub fn explain(e: &Error) -> String {
    match e.kind {
        ErrorKind::InvalidState
        | ErrorKind::NotFound
        | ErrorKind::OutOfRange
        | ErrorKind::InvalidArgument => sentence(&e.error.to_string()),
        ErrorKind::ResolutionFailure => {
            format!("Could not find anything playable: {}.", e.error)
        }
        ErrorKind::SinkFailure => format!("The audio connection failed: {}.", e.error),
        ErrorKind::Unavailable => format!("Could not connect: {}.", e.error),
        ErrorKind::DeadlineExceeded => "The lookup took too long.".to_owned(),
        ErrorKind::Cancelled => "The request was cancelled.".to_owned(),
        ErrorKind::Internal | ErrorKind::Unknown => {
            error!("{e}");
            "Something went wrong.".to_owned()
        }
    }
}

fn sentence(text: &str) -> String {
    let mut chars = text.chars();
    let mut sentence: String = chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default();
    sentence.push('.');
    sentence
}

fn describe(entry: &Entry) -> String {
    match entry.duration() {
        Some(duration) => format!("{entry} [{}]", clock(duration)),
        None => entry.to_string(),
    }
}

fn render(page: &Page) -> String {
    if page.total == 0 {
        return "The queue is empty.".to_owned();
    }
    if page.entries.is_empty() {
        return format!(
            "There is no page {}; the queue has {} pages.",
            page.number, page.pages
        );
    }

    let mut text = format!(
        "Page {}/{}, {} entries, {} total:",
        page.number,
        page.pages,
        page.total,
        clock(page.duration)
    );
    for (n, entry) in page.entries.iter().enumerate() {
        let _ = write!(text, "\n{}. {}", page.offset + n + 1, describe(entry));
    }
    text
}

pub struct Console {
    registry: Arc<Registry>,
    session: SessionId,
    requester: String,
    output: mpsc::UnboundedSender<String>,
}

impl Console {
    /// Creates a console for `session`, acting on behalf of `requester`.
    /// Returns the receiving end of the asynchronous messages.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        session: SessionId,
        requester: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (output, messages) = mpsc::unbounded_channel();
        let console = Self {
            registry,
            session,
            requester: requester.into(),
            output,
        };
        (console, messages)
    }

    pub async fn execute(&self, command: Command) -> String {
        if command == Command::Leave {
            return if self.registry.leave(self.session).await {
                "Left the channel.".to_owned()
            } else {
                "Not connected.".to_owned()
            };
        }

        let session = self.registry.get_or_create(self.session);
        match command {
            Command::Join => match self.join(&session) {
                Ok(true) => "Joined the channel.".to_owned(),
                Ok(false) => "Already connected.".to_owned(),
                Err(e) => explain(&e),
            },
            Command::Play { query, next } => self.play(&session, &query, next).await,
            Command::Pause => match session.pause() {
                Ok(()) => "Paused.".to_owned(),
                Err(e) => explain(&e),
            },
            Command::Resume => match session.resume() {
                Ok(()) => "Resumed.".to_owned(),
                Err(e) => explain(&e),
            },
            Command::Stop => match session.stop() {
                Ok(()) => "Stopped and cleared the queue.".to_owned(),
                Err(e) => explain(&e),
            },
            Command::Skip => match session.skip(false) {
                Ok(entry) => format!("Skipped {entry}."),
                Err(e) => explain(&e),
            },
            Command::Back => match session.skip(true) {
                Ok(entry) => format!("Going back to {entry}."),
                Err(e) => explain(&e),
            },
            Command::Loop => {
                if session.toggle_loop() {
                    "Looping the queue.".to_owned()
                } else {
                    "Not looping anymore.".to_owned()
                }
            }
            Command::Now => Self::now(&session),
            Command::Queue(page) => render(&session.queue_page(page)),
            Command::Shuffle => match session.shuffle() {
                0 => "The queue is empty.".to_owned(),
                len => format!("Shuffled {len} entries."),
            },
            Command::Remove(target) => Self::remove(&session, target).await,
            Command::Clear => match session.clear() {
                0 => "The queue is empty.".to_owned(),
                len => format!("Removed {len} entries from the queue."),
            },
            Command::Status => format!(
                "{} Looping is {}; {} entries in the history.\n{}",
                Self::now(&session),
                if session.is_looping() { "on" } else { "off" },
                session.history_len(),
                render(&session.queue_page(1)),
            ),
            Command::Help => HELP.to_owned(),
            Command::Quit | Command::Leave => "Bye.".to_owned(),
        }
    }

    /// Starts the session, announcing its events on the output channel.
    fn join(&self, session: &Session) -> Result<bool> {
        let mut events = session.subscribe();
        let started = session.start()?;
        if started {
            let output = self.output.clone();
            tokio::spawn(async move {
                loop {
                    let message = match events.recv().await {
                        Ok(Event::TrackChanged(entry)) => format!("Now playing {}.", describe(&entry)),
                        Ok(Event::SinkFailed(reason)) => format!("Playback failed: {reason}"),
                        Ok(Event::Disconnected) | Err(RecvError::Closed) => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(missed)) => {
                            trace!("missed {missed} events");
                            continue;
                        }
                    };
                    if output.send(message).is_err() {
                        break;
                    }
                }
            });
        }
        Ok(started)
    }

    async fn play(&self, session: &Session, query: &str, next: bool) -> String {
        if !session.is_connected() {
            if let Err(e) = self.join(session) {
                return explain(&e);
            }
        }

        match session.play(query, next, Some(&self.requester)).await {
            Ok(Queued::Entry { entry, position }) => {
                if next {
                    format!("{} will play next.", describe(&entry))
                } else {
                    format!("Queued {} at position {position}.", describe(&entry))
                }
            }
            Ok(Queued::Collection(feed)) => {
                let reply = format!("Queueing {}.", feed.summary);
                let output = self.output.clone();
                tokio::spawn(async move {
                    let title = feed.summary.title.clone();
                    let report = feed.finished().await;
                    let _ = output.send(format!("Finished processing {title}: {report}."));
                });
                reply
            }
            Err(e) => explain(&e),
        }
    }

    fn now(session: &Session) -> String {
        match session.current() {
            Some(entry) => format!("Now playing {} ({}).", describe(&entry), session.state()),
            None => "Nothing is playing.".to_owned(),
        }
    }

    async fn remove(session: &Session, target: Target) -> String {
        if session.queue_len() == 0 {
            return "The queue is empty.".to_owned();
        }

        let removed = match target {
            Target::Position(position) => session.remove_at(position).map(|entry| vec![entry]),
            Target::Query(query) => session.remove_by_query(&query).await,
        };
        match removed.as_deref() {
            Ok([entry]) => format!("Removed {entry} from the queue."),
            Ok(entries) => format!("Removed {} entries from the queue.", entries.len()),
            Err(e) => explain(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        line.parse().unwrap()
    }

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(parse("join"), Command::Join);
        assert_eq!(parse("  SUMMON "), Command::Join);
        assert_eq!(parse("np"), Command::Now);
        assert_eq!(parse("queue"), Command::Queue(1));
        assert_eq!(parse("q 3"), Command::Queue(3));
        assert_eq!(
            parse("play  never gonna give you up "),
            Command::Play {
                query: "never gonna give you up".to_owned(),
                next: false
            }
        );
        assert_eq!(
            parse("playnext sim://album/x"),
            Command::Play {
                query: "sim://album/x".to_owned(),
                next: true
            }
        );
    }

    #[test]
    fn remove_takes_positions_or_queries() {
        assert_eq!(parse("remove 2"), Command::Remove(Target::Position(2)));
        assert_eq!(
            parse("rm come together"),
            Command::Remove(Target::Query("come together".to_owned()))
        );
    }

    #[test]
    fn rejects_bad_input() {
        for line in ["", "dance", "play", "remove", "queue two"] {
            let err = line.parse::<Command>().unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidArgument, "{line:?}");
        }
    }

    #[test]
    fn explains_errors_as_sentences() {
        assert_eq!(
            explain(&Error::invalid_state("nothing is playing")),
            "Nothing is playing."
        );
        assert_eq!(explain(&Error::cancelled("gone")), "The request was cancelled.");
    }

    #[test]
    fn renders_empty_queue() {
        assert_eq!(render(&Page::default()), "The queue is empty.");
    }
}
