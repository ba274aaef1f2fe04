//! Record of previously played entries, most recent last.

use std::{collections::VecDeque, num::NonZeroUsize};

use crate::entry::Entry;

#[derive(Clone, Debug, Default)]
pub struct History {
    entries: VecDeque<Entry>,
    limit: Option<NonZeroUsize>,
}

impl History {
    /// Creates a history that forgets its oldest entries beyond `limit`, or
    /// grows without bound when there is no limit.
    #[must_use]
    pub fn new(limit: Option<NonZeroUsize>) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    pub fn push(&mut self, entry: Entry) {
        if let Some(limit) = self.limit {
            while self.entries.len() >= limit.get() {
                self.entries.pop_front();
            }
        }
        self.entries.push_back(entry);
    }

    /// Takes the most recently played entry.
    pub fn pop(&mut self) -> Option<Entry> {
        self.entries.pop_back()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Entry> {
        self.entries.back()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::tests::ready;

    #[test]
    fn pops_most_recent_first() {
        let mut history = History::new(None);
        history.push(ready("a"));
        history.push(ready("b"));
        assert_eq!(history.last().unwrap().id().as_str(), "b");
        assert_eq!(history.pop().unwrap().id().as_str(), "b");
        assert_eq!(history.pop().unwrap().id().as_str(), "a");
        assert!(history.pop().is_none());
    }

    #[test]
    fn limit_drops_oldest() {
        let mut history = History::new(NonZeroUsize::new(2));
        for id in ["a", "b", "c"] {
            history.push(ready(id));
        }
        let ids: Vec<_> = history.iter().map(|entry| entry.id().as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }
}
