//! The ordered play queue of a session.
//!
//! The front of the queue plays next. Positions exposed to users are
//! 1-based; the queue itself is a plain [`VecDeque`] and carries no locking.
//! Sessions wrap it in a mutex so that each method call is one atomic
//! mutation.

use std::{collections::HashSet, collections::VecDeque, num::NonZeroUsize, time::Duration};

use crate::{
    entry::{Entry, EntryId},
    error::{Error, Result},
};

/// One page of the queue, for display.
#[derive(Clone, Debug, Default)]
pub struct Page {
    /// 1-based number of this page.
    pub number: usize,

    /// Total number of pages; at least 1.
    pub pages: usize,

    /// Number of entries before this page. The first entry on the page has
    /// position `offset + 1`.
    pub offset: usize,

    /// Entries on this page, empty when the page is out of range.
    pub entries: Vec<Entry>,

    /// Total number of entries in the queue.
    pub total: usize,

    /// Sum of all known durations in the queue.
    pub duration: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct PlayQueue {
    entries: VecDeque<Entry>,
}

impl PlayQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: Entry) {
        self.entries.push_back(entry);
    }

    /// Puts the entry in front, to play next.
    pub fn prepend(&mut self, entry: Entry) {
        self.entries.push_front(entry);
    }

    /// Inserts the entry right after `anchor`, or at the front when there is
    /// no anchor or the anchor is no longer queued. Returns the 1-based
    /// position the entry landed on.
    pub fn insert_after(&mut self, anchor: Option<&Entry>, entry: Entry) -> usize {
        let index = anchor
            .and_then(|anchor| self.entries.iter().position(|queued| queued.same(anchor)))
            .map_or(0, |index| index + 1);
        self.entries.insert(index, entry);
        index + 1
    }

    /// Removes the entry at the 1-based `position`.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`](crate::error::ErrorKind::OutOfRange) when there
    /// is no such position; the queue is left as it was.
    pub fn remove_at(&mut self, position: usize) -> Result<Entry> {
        position
            .checked_sub(1)
            .and_then(|index| self.entries.remove(index))
            .ok_or_else(|| {
                Error::out_of_range(format!(
                    "{position} is not a valid position in a queue of {}",
                    self.entries.len()
                ))
            })
    }

    /// Removes the first entry, in queue order, whose identifier is in `ids`.
    pub fn remove_matching(&mut self, ids: &HashSet<EntryId>) -> Option<Entry> {
        let index = self
            .entries
            .iter()
            .position(|entry| ids.contains(entry.id()))?;
        self.entries.remove(index)
    }

    /// Removes every entry whose identifier is in `ids`, keeping the order of
    /// the others.
    pub fn remove_all_matching(&mut self, ids: &HashSet<EntryId>) -> Vec<Entry> {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            if ids.contains(entry.id()) {
                removed.push(entry.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Whether any queued entry has an identifier in `ids`.
    #[must_use]
    pub fn contains_any(&self, ids: &HashSet<EntryId>) -> bool {
        self.entries.iter().any(|entry| ids.contains(entry.id()))
    }

    /// Randomly permutes all queued entries.
    pub fn shuffle(&mut self) {
        if self.entries.len() > 1 {
            fastrand::shuffle(self.entries.make_contiguous());
        }
    }

    #[must_use]
    pub fn peek_front(&self) -> Option<&Entry> {
        self.entries.front()
    }

    pub fn pop_front(&mut self) -> Option<Entry> {
        self.entries.pop_front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Returns the 1-based `page` of `page_size` entries. Pages out of range
    /// are empty rather than an error.
    #[must_use]
    pub fn page(&self, page: usize, page_size: NonZeroUsize) -> Page {
        let total = self.entries.len();
        let page_size = page_size.get();
        let pages = total.div_ceil(page_size).max(1);
        let offset = page.saturating_sub(1).saturating_mul(page_size);

        let entries = if page == 0 {
            Vec::new()
        } else {
            self.entries
                .iter()
                .skip(offset)
                .take(page_size)
                .cloned()
                .collect()
        };

        Page {
            number: page,
            pages,
            offset,
            entries,
            total,
            duration: self.entries.iter().filter_map(Entry::duration).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::tests::ready;

    fn queue(ids: &[&str]) -> PlayQueue {
        let mut queue = PlayQueue::new();
        for id in ids {
            queue.append(ready(id));
        }
        queue
    }

    fn ids(queue: &PlayQueue) -> Vec<&str> {
        queue.iter().map(|entry| entry.id().as_str()).collect()
    }

    fn set(ids: &[&str]) -> HashSet<EntryId> {
        ids.iter().map(|id| EntryId::from(*id)).collect()
    }

    #[test]
    fn append_and_prepend_order() {
        let mut queue = queue(&["b"]);
        queue.append(ready("c"));
        queue.prepend(ready("a"));
        assert_eq!(ids(&queue), ["a", "b", "c"]);
        assert_eq!(queue.pop_front().unwrap().id().as_str(), "a");
        assert_eq!(queue.peek_front().unwrap().id().as_str(), "b");
    }

    #[test]
    fn remove_at_is_one_based() {
        let mut queue = queue(&["a", "b", "c"]);
        assert_eq!(queue.remove_at(2).unwrap().id().as_str(), "b");
        assert_eq!(ids(&queue), ["a", "c"]);
    }

    #[test]
    fn remove_at_out_of_range_leaves_queue_alone() {
        let mut queue = queue(&["a", "b"]);
        for position in [0, 3, usize::MAX] {
            let err = queue.remove_at(position).unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::OutOfRange);
        }
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn remove_matching_takes_first_match_only() {
        let mut queue = queue(&["A", "B", "C", "A"]);
        let removed = queue.remove_matching(&set(&["A", "C"])).unwrap();
        assert_eq!(removed.id().as_str(), "A");
        assert_eq!(ids(&queue), ["B", "C", "A"]);
    }

    #[test]
    fn remove_matching_without_match_is_noop() {
        let mut queue = queue(&["A", "B"]);
        assert!(queue.remove_matching(&set(&["X"])).is_none());
        assert!(!queue.contains_any(&set(&["X"])));
        assert_eq!(ids(&queue), ["A", "B"]);
    }

    #[test]
    fn remove_all_matching_keeps_others_in_order() {
        let mut queue = queue(&["A", "B", "C", "A"]);
        let removed = queue.remove_all_matching(&set(&["A", "C"]));
        assert_eq!(removed.len(), 3);
        assert_eq!(ids(&queue), ["B"]);
    }

    #[test]
    fn length_tracks_successful_mutations() {
        let mut queue = PlayQueue::new();
        let mut expected = 0usize;
        for step in 0..200usize {
            match step % 5 {
                0 | 1 => {
                    queue.append(ready(&format!("{step}")));
                    expected += 1;
                }
                2 => {
                    queue.prepend(ready(&format!("{step}")));
                    expected += 1;
                }
                3 => {
                    if queue.remove_at(step % 7 + 1).is_ok() {
                        expected -= 1;
                    }
                }
                _ => {
                    let target = format!("{}", step - 4);
                    let target = set(&[target.as_str()]);
                    if queue.remove_matching(&target).is_some() {
                        expected -= 1;
                    }
                }
            }
            assert_eq!(queue.len(), expected);
        }
    }

    #[test]
    fn insert_after_follows_anchor() {
        let mut queue = queue(&["x", "y"]);
        let first = ready("1");
        assert_eq!(queue.insert_after(None, first.clone()), 1);
        let second = ready("2");
        assert_eq!(queue.insert_after(Some(&first), second.clone()), 2);
        assert_eq!(ids(&queue), ["1", "2", "x", "y"]);

        // A vanished anchor puts the entry in front.
        queue.pop_front();
        queue.pop_front();
        assert_eq!(queue.insert_after(Some(&second), ready("3")), 1);
        assert_eq!(ids(&queue), ["3", "x", "y"]);
    }

    #[test]
    fn shuffle_small_queues_is_noop() {
        let mut empty = PlayQueue::new();
        empty.shuffle();
        assert!(empty.is_empty());

        let mut single = queue(&["a"]);
        single.shuffle();
        assert_eq!(ids(&single), ["a"]);
    }

    #[test]
    fn shuffle_preserves_entries() {
        let names: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut queue = queue(&names);
        queue.shuffle();

        let mut shuffled = ids(&queue);
        shuffled.sort_unstable();
        let mut expected = names.clone();
        expected.sort_unstable();
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn pages_are_one_based_and_lenient() {
        let queue = queue(&["a", "b", "c", "d", "e"]);
        let size = NonZeroUsize::new(2).unwrap();

        let first = queue.page(1, size);
        assert_eq!(first.pages, 3);
        assert_eq!(first.offset, 0);
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.duration, Duration::from_secs(5 * 60));

        let last = queue.page(3, size);
        assert_eq!(last.offset, 4);
        assert_eq!(last.entries[0].id().as_str(), "e");

        assert!(queue.page(4, size).entries.is_empty());
        assert!(queue.page(0, size).entries.is_empty());
        assert_eq!(PlayQueue::new().page(1, size).pages, 1);
    }
}
