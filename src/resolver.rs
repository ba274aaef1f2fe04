//! Interface to the metadata and stream resolution backends.
//!
//! Resolvers talk to slow external services (search APIs, extractors) and
//! are called synchronously from the pipeline's worker pool, never from the
//! async scheduler. Implementations should impose their own network
//! timeouts; the pipeline adds an overall deadline on top.

use crate::{
    entry::{Locator, Resolved, Stub},
    error::Result,
};

/// What a request expands into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Kind {
    /// One entry, resolved before it is queued.
    #[default]
    Single,
    /// An ordered album or playlist, queued while it resolves.
    Collection,
}

/// Ordered contents of a collection, before any entry is resolved.
#[derive(Clone, Debug)]
pub struct Listing {
    pub title: String,
    pub locator: Locator,
    pub items: Vec<Stub>,
}

pub trait Resolver: Send + Sync + 'static {
    /// Decides whether `locator` names one item or a collection. Search
    /// queries are single items unless a resolver says otherwise.
    fn classify(&self, locator: &Locator) -> Kind {
        let _ = locator;
        Kind::Single
    }

    /// Resolves a link or the best search result into a playable entry.
    ///
    /// # Errors
    ///
    /// Returns an error when nothing playable is found.
    fn resolve_single(&self, locator: &Locator) -> Result<(Stub, Resolved)>;

    /// Lists a collection, or the results of a search query.
    ///
    /// # Errors
    ///
    /// Returns an error when the collection cannot be listed at all.
    fn resolve_collection(&self, locator: &Locator) -> Result<Listing>;

    /// Resolves one listed item.
    ///
    /// # Errors
    ///
    /// Returns an error when this item cannot be played; its siblings are
    /// not affected.
    fn enrich(&self, stub: &Stub) -> Result<Resolved>;
}
