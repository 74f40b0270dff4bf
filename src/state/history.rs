use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Linear undo/redo history over immutable snapshots.
///
/// `set_state` is the only transition that discards anything: it drops the
/// redo path and, once `past` is full, the oldest entry. `undo` and `redo`
/// only move the boundary between the stacks.
#[derive(Debug, Clone)]
pub struct History<T> {
    past: VecDeque<T>,
    present: T,
    future: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    pub fn new(initial: T) -> Self {
        Self::with_capacity(initial, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(initial: T, capacity: usize) -> Self {
        Self {
            past: VecDeque::with_capacity(capacity),
            present: initial,
            future: VecDeque::new(),
            capacity,
        }
    }

    pub fn present(&self) -> &T {
        &self.present
    }

    /// Oldest first
    pub fn past(&self) -> impl ExactSizeIterator<Item = &T> {
        self.past.iter()
    }

    /// Next redo first
    pub fn future(&self) -> impl ExactSizeIterator<Item = &T> {
        self.future.iter()
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Commit a new present
    pub fn set_state(&mut self, state: T) {
        let previous = std::mem::replace(&mut self.present, state);
        self.past.push_back(previous);
        while self.past.len() > self.capacity {
            self.past.pop_front();
        }
        self.future.clear();
    }

    /// Overwrite the present without recording a step
    pub fn replace_present(&mut self, state: T) {
        self.present = state;
    }

    /// Step back; returns false when there is nothing to undo
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.past.pop_back() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, previous);
        self.future.push_front(current);
        true
    }

    /// Step forward; returns false when there is nothing to redo
    pub fn redo(&mut self) -> bool {
        let Some(next) = self.future.pop_front() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, next);
        self.past.push_back(current);
        while self.past.len() > self.capacity {
            self.past.pop_front();
        }
        true
    }

    /// Forget both stacks, keeping the present
    pub fn clear_history(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}
