//! Observer lists used for change notification.
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Returned by a callback to say whether it wants further notifications.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CallbackStatus {
    Keep,
    Remove,
}

/// Ordered list of callbacks receiving events of type `E`.
pub struct CallbackList<E> {
    next_id: u64,
    callbacks: Vec<(CallbackId, Box<dyn FnMut(&E) -> CallbackStatus>)>,
}

impl<E> Default for CallbackList<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            callbacks: Vec::new(),
        }
    }
}

impl<E> fmt::Debug for CallbackList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackList")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl<E> CallbackList<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, callback: F) -> CallbackId
    where
        F: FnMut(&E) -> CallbackStatus + 'static,
    {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    pub fn remove(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(existing, _)| *existing != id);
        self.callbacks.len() != before
    }

    pub fn contains(&self, id: CallbackId) -> bool {
        self.callbacks.iter().any(|(existing, _)| *existing == id)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Calls every callback in registration order, dropping those that ask to be removed.
    pub fn notify(&mut self, event: &E) {
        self.callbacks
            .retain_mut(|(_, callback)| callback(event) == CallbackStatus::Keep);
    }
}
