//! An ordered list that reports every mutation to its subscribers.
//!
//! Each subscriber gets its own unbounded channel and receives changes in
//! the order they were applied. Subscribers that have dropped their
//! receiver are pruned on the next mutation.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// A single mutation of an [`ObservableList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChange<T> {
    Append { value: T },
    Insert { index: usize, value: T },
    Remove { index: usize, value: T },
}

#[derive(Debug)]
pub struct ObservableList<T> {
    items: Vec<T>,
    subscribers: Vec<UnboundedSender<ListChange<T>>>,
}

impl<T> Default for ObservableList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            subscribers: Vec::new(),
        }
    }
}

impl<T: Clone> ObservableList<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every change applied from now on.
    pub fn subscribe(&mut self) -> UnboundedReceiver<ListChange<T>> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn append(&mut self, value: T) {
        self.items.push(value.clone());
        self.emit(&ListChange::Append { value });
    }

    /// Insert at `index`, shifting later items. Inserting at `len()` is an
    /// insert, not an append.
    ///
    /// # Panics
    ///
    /// Panics if `index > len()`.
    pub fn insert(&mut self, index: usize, value: T) {
        self.items.insert(index, value.clone());
        self.emit(&ListChange::Insert { index, value });
    }

    /// Insert `values` starting at `index`, one change per item.
    ///
    /// # Panics
    ///
    /// Panics if `index > len()`.
    pub fn insert_many(&mut self, index: usize, values: impl IntoIterator<Item = T>) {
        for (offset, value) in values.into_iter().enumerate() {
            self.insert(index + offset, value);
        }
    }

    /// Remove and return the item at `index`, or `None` when out of range.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }
        let value = self.items.remove(index);
        self.emit(&ListChange::Remove {
            index,
            value: value.clone(),
        });
        Some(value)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    fn emit(&mut self, change: &ListChange<T>) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_see_each_change_in_order() {
        let mut list = ObservableList::new();
        let mut rx = list.subscribe();

        list.append('b');
        list.insert(0, 'a');
        list.insert_many(2, ['c', 'd']);
        assert_eq!(list.remove(1), Some('b'));
        assert_eq!(list.remove(9), None);

        let mut changes = Vec::new();
        while let Ok(change) = rx.try_recv() {
            changes.push(change);
        }
        assert_eq!(
            changes,
            [
                ListChange::Append { value: 'b' },
                ListChange::Insert { index: 0, value: 'a' },
                ListChange::Insert { index: 2, value: 'c' },
                ListChange::Insert { index: 3, value: 'd' },
                ListChange::Remove { index: 1, value: 'b' },
            ]
        );
        assert_eq!(list.as_slice(), ['a', 'c', 'd']);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut list = ObservableList::new();
        let rx = list.subscribe();
        let mut kept = list.subscribe();
        drop(rx);

        list.append(1);
        assert_eq!(list.subscribers.len(), 1);
        assert_eq!(kept.try_recv().ok(), Some(ListChange::Append { value: 1 }));
    }
}
