//! Shared animation time.
use crate::callback::{CallbackId, CallbackList, CallbackStatus};
use log::warn;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeEvent {
    pub time: f64,
}

/// Current time within a `[minimum, maximum]` range, notifying observers when it changes.
#[derive(Debug)]
pub struct TimeKeeper {
    time: f64,
    minimum: f64,
    maximum: f64,
    callbacks: CallbackList<TimeEvent>,
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self {
            time: 0.0,
            minimum: 0.0,
            maximum: 1.0,
            callbacks: CallbackList::new(),
        }
    }
}

impl TimeKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn minimum(&self) -> f64 {
        self.minimum
    }

    pub fn maximum(&self) -> f64 {
        self.maximum
    }

    /// Sets the range. Returns `false` and leaves the range unchanged if `minimum > maximum`.
    pub fn set_range(&mut self, minimum: f64, maximum: f64) -> bool {
        if minimum > maximum {
            warn!("Invalid time range [{}, {}]", minimum, maximum);
            return false;
        }
        self.minimum = minimum;
        self.maximum = maximum;
        true
    }

    pub fn add_callback<F>(&mut self, callback: F) -> CallbackId
    where
        F: FnMut(&TimeEvent) -> CallbackStatus + 'static,
    {
        self.callbacks.add(callback)
    }

    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        self.callbacks.remove(id)
    }

    /// Sets the time and notifies observers.
    pub fn set_time(&mut self, time: f64) {
        self.time = time;
        self.callbacks.notify(&TimeEvent { time });
    }

    /// Sets the time without notifying observers.
    pub fn set_time_quiet(&mut self, time: f64) {
        self.time = time;
    }
}
