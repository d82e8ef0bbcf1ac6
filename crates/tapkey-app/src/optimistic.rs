//! Optimistic values with explicit commit/rollback

use serde::Serialize;

/// A confirmed value plus an at-most-one provisional replacement.
///
/// Readers see the provisional value as soon as it is set; the confirmed
/// value only changes on [`commit`](Self::commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Optimistic<T> {
    confirmed: T,
    pending: Option<T>,
}

impl<T: Clone> Optimistic<T> {
    pub fn new(value: T) -> Self {
        Self {
            confirmed: value,
            pending: None,
        }
    }

    /// The value to display: pending if any, else confirmed
    pub fn current(&self) -> &T {
        self.pending.as_ref().unwrap_or(&self.confirmed)
    }

    pub fn confirmed(&self) -> &T {
        &self.confirmed
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Stage `value`. Returns `false` and changes nothing if a value is
    /// already pending.
    pub fn begin(&mut self, value: T) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(value);
        true
    }

    /// Promote the pending value. No-op when nothing is pending.
    pub fn commit(&mut self) {
        if let Some(value) = self.pending.take() {
            self.confirmed = value;
        }
    }

    /// Discard the pending value
    pub fn rollback(&mut self) {
        self.pending = None;
    }

    /// Replace the confirmed value, dropping anything pending
    pub fn reset(&mut self, value: T) {
        self.confirmed = value;
        self.pending = None;
    }
}

impl<T: Clone + Default> Default for Optimistic<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
