//! Simulated backends for running the jukebox without any network or audio
//! device.
//!
//! [`SimResolver`] answers searches and `sim://` links with made-up entries
//! after a random delay. [`SimSink`] "plays" a stream by waiting for its
//! duration.
//!
//! # Links
//!
//! * `sim://track/<id>`: a single entry
//! * `sim://album/<name>?size=N&broken=2,5` and `sim://playlist/...`: a
//!   collection of `N` entries (default 10), where the listed positions fail
//!   to resolve
//!
//! Searches for text containing "nothing" find nothing; other searches find
//! one entry, or five when listed as a collection for removal.

use std::{collections::HashSet, ops::Range, time::Duration};

use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use url::Url;

use crate::{
    entry::{EntryId, Locator, Resolved, StreamHandle, Stub},
    error::{Error, Result},
    registry::SessionId,
    resolver::{Kind, Listing, Resolver},
    sink::{Connector, Done, Sink},
};

const SCHEME: &str = "sim";
const DEFAULT_SIZE: usize = 10;
const MAX_SIZE: usize = 100;
const SEARCH_RESULTS: usize = 5;

#[derive(Clone, Debug)]
pub struct SimResolver {
    /// Milliseconds each call takes.
    latency: Range<u64>,
}

impl SimResolver {
    #[must_use]
    pub fn new() -> Self {
        Self { latency: 50..400 }
    }

    #[must_use]
    pub fn with_latency(latency: Range<Duration>) -> Self {
        let start = u64::try_from(latency.start.as_millis()).unwrap_or(u64::MAX);
        let end = u64::try_from(latency.end.as_millis()).unwrap_or(u64::MAX);
        Self {
            latency: start..end,
        }
    }

    fn delay(&self) {
        let millis = if self.latency.is_empty() {
            self.latency.start
        } else {
            fastrand::u64(self.latency.clone())
        };
        std::thread::sleep(Duration::from_millis(millis));
    }

    fn track(id: &str, title: &str) -> Result<(Stub, Resolved)> {
        let secs = 2 + id.bytes().map(u64::from).sum::<u64>() % 5;
        let stub = Stub {
            id: EntryId::from(id),
            title: title.to_owned(),
            artist: None,
            locator: Locator::Url(Url::parse(&format!("{SCHEME}://track/{id}"))?),
        };
        let resolved = Resolved {
            duration: Some(Duration::from_secs(secs)),
            stream: StreamHandle::new(Url::parse(&format!(
                "{SCHEME}://stream/{id}?secs={secs}"
            ))?),
        };
        Ok((stub, resolved))
    }

    fn search(query: &str) -> Result<String> {
        if query.to_lowercase().contains("nothing") {
            return Err(Error::resolution_failure(format!(
                "no results for \"{query}\""
            )));
        }
        Ok(slug(query))
    }
}

impl Default for SimResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for SimResolver {
    fn classify(&self, locator: &Locator) -> Kind {
        match locator.as_url() {
            Some(url)
                if url.scheme() == SCHEME
                    && matches!(url.host_str(), Some("album" | "playlist")) =>
            {
                Kind::Collection
            }
            _ => Kind::Single,
        }
    }

    fn resolve_single(&self, locator: &Locator) -> Result<(Stub, Resolved)> {
        self.delay();
        match locator {
            Locator::Search(query) => {
                let id = Self::search(query)?;
                Self::track(&id, query)
            }
            Locator::Url(url) if url.scheme() == SCHEME && url.host_str() == Some("track") => {
                let id = first_segment(url)
                    .ok_or_else(|| Error::invalid_argument(format!("{url} names no track")))?;
                Self::track(&slug(id), id)
            }
            Locator::Url(url) => Err(Error::resolution_failure(format!(
                "{url} is not a supported link"
            ))),
        }
    }

    fn resolve_collection(&self, locator: &Locator) -> Result<Listing> {
        self.delay();
        match locator {
            Locator::Search(query) => {
                let id = Self::search(query)?;
                let items = (1..=SEARCH_RESULTS)
                    .map(|n| {
                        let (id, title) = if n == 1 {
                            (id.clone(), query.clone())
                        } else {
                            (format!("{id}-{n}"), format!("{query} ({n})"))
                        };
                        Self::track(&id, &title).map(|(stub, _)| stub)
                    })
                    .collect::<Result<_>>()?;
                Ok(Listing {
                    title: format!("results for \"{query}\""),
                    locator: locator.clone(),
                    items,
                })
            }
            Locator::Url(url) if self.classify(locator) == Kind::Collection => {
                let name = first_segment(url).unwrap_or("untitled");
                let size = query_value(url, "size")
                    .and_then(|size| size.parse().ok())
                    .unwrap_or(DEFAULT_SIZE)
                    .min(MAX_SIZE);
                let broken: HashSet<usize> = query_value(url, "broken")
                    .map(|list| list.split(',').filter_map(|n| n.parse().ok()).collect())
                    .unwrap_or_default();

                let items = (1..=size)
                    .map(|n| {
                        let mut title = format!("{name} #{n}");
                        if broken.contains(&n) {
                            title.push_str(" (broken)");
                        }
                        Self::track(&format!("{}-{n}", slug(name)), &title).map(|(stub, _)| stub)
                    })
                    .collect::<Result<_>>()?;
                Ok(Listing {
                    title: name.to_owned(),
                    locator: locator.clone(),
                    items,
                })
            }
            Locator::Url(url) => Err(Error::resolution_failure(format!(
                "{url} is not a collection"
            ))),
        }
    }

    fn enrich(&self, stub: &Stub) -> Result<Resolved> {
        self.delay();
        if stub.title.contains("(broken)") {
            return Err(Error::resolution_failure(format!(
                "{} is unavailable",
                stub.title
            )));
        }
        Self::track(stub.id.as_str(), &stub.title).map(|(_, resolved)| resolved)
    }
}

/// Lowercase alphanumerics, everything else collapsed into single dashes.
fn slug(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

fn first_segment(url: &Url) -> Option<&str> {
    url.path_segments()?.find(|segment| !segment.is_empty())
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, value)| value.into_owned())
}

struct Playing {
    paused: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Plays `sim://stream/...?secs=N` handles by waiting `N` seconds, minus
/// the time spent paused.
pub struct SimSink {
    session: SessionId,
    playing: Option<Playing>,
}

impl SimSink {
    const DEFAULT_SECS: u64 = 3;

    #[must_use]
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            playing: None,
        }
    }

    fn halt(&mut self) {
        if let Some(playing) = self.playing.take() {
            playing.task.abort();
        }
    }

    fn playing(&self) -> Result<&Playing> {
        self.playing
            .as_ref()
            .ok_or_else(|| Error::invalid_state("nothing is streaming"))
    }
}

impl Sink for SimSink {
    fn start(&mut self, stream: &StreamHandle) -> Result<Done> {
        let url = stream.url();
        if url.scheme() != SCHEME {
            return Err(Error::sink_failure(format!("cannot stream {url}")));
        }
        self.halt();

        let secs = query_value(url, "secs")
            .and_then(|secs| secs.parse().ok())
            .unwrap_or(Self::DEFAULT_SECS);
        let (done_tx, done_rx) = oneshot::channel();
        let (paused, mut paused_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut remaining = Duration::from_secs(secs);
            loop {
                if *paused_rx.borrow_and_update() {
                    if paused_rx.changed().await.is_err() {
                        return;
                    }
                    continue;
                }

                let started = Instant::now();
                tokio::select! {
                    () = tokio::time::sleep(remaining) => {
                        let _ = done_tx.send(Ok(()));
                        return;
                    }
                    changed = paused_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        remaining = remaining.saturating_sub(started.elapsed());
                    }
                }
            }
        });

        trace!("session {} streaming {stream}", self.session);
        self.playing = Some(Playing { paused, task });
        Ok(done_rx)
    }

    fn pause(&mut self) -> Result<()> {
        self.playing()?.paused.send_replace(true);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.playing()?.paused.send_replace(false);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.halt();
        Ok(())
    }

    fn disconnect(&mut self) {
        self.halt();
        info!("session {} left the simulated channel", self.session);
    }
}

/// Opens a [`SimSink`] for every session.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimConnector;

impl Connector for SimConnector {
    fn connect(&self, session: SessionId) -> Result<Box<dyn Sink>> {
        Ok(Box::new(SimSink::new(session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant() -> SimResolver {
        SimResolver::with_latency(Duration::ZERO..Duration::ZERO)
    }

    #[test]
    fn slugs() {
        assert_eq!(slug("Never Gonna Give You Up!"), "never-gonna-give-you-up");
        assert_eq!(slug("  a--b  "), "a-b");
    }

    #[test]
    fn classifies_links() {
        let resolver = instant();
        let album = Locator::parse("sim://album/abbey-road?size=3");
        let track = Locator::parse("sim://track/something");
        assert_eq!(resolver.classify(&album), Kind::Collection);
        assert_eq!(resolver.classify(&track), Kind::Single);
        assert_eq!(resolver.classify(&Locator::parse("come together")), Kind::Single);
    }

    #[test]
    fn search_results_include_the_single_result() {
        let resolver = instant();
        let query = Locator::parse("come together");
        let (single, _) = resolver.resolve_single(&query).unwrap();
        let listing = resolver.resolve_collection(&query).unwrap();
        assert_eq!(listing.items.len(), SEARCH_RESULTS);
        assert_eq!(listing.items[0].id, single.id);
    }

    #[test]
    fn broken_items_fail_to_enrich() {
        let resolver = instant();
        let listing = resolver
            .resolve_collection(&Locator::parse("sim://playlist/mix?size=4&broken=2"))
            .unwrap();
        assert_eq!(listing.items.len(), 4);
        assert!(resolver.enrich(&listing.items[0]).is_ok());
        assert!(resolver.enrich(&listing.items[1]).is_err());
    }

    #[test]
    fn nothing_is_found() {
        let err = instant()
            .resolve_single(&Locator::parse("absolutely nothing"))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ResolutionFailure);
    }

    fn stream(secs: u64) -> StreamHandle {
        StreamHandle::new(Url::parse(&format!("sim://stream/x?secs={secs}")).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn sink_finishes_after_the_duration() {
        let mut sink = SimSink::new(1);
        let started = Instant::now();
        let done = sink.start(&stream(3)).unwrap();
        done.await.unwrap().unwrap();
        assert_eq!(started.elapsed().as_secs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_pauses_the_clock() {
        let mut sink = SimSink::new(1);
        let started = Instant::now();
        let done = sink.start(&stream(3)).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        sink.pause().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        sink.resume().unwrap();

        done.await.unwrap().unwrap();
        assert_eq!(started.elapsed().as_secs(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_drops_the_completion() {
        let mut sink = SimSink::new(1);
        let done = sink.start(&stream(3)).unwrap();
        sink.stop().unwrap();
        assert!(done.await.is_err());
        assert!(sink.pause().is_err());
    }
}
