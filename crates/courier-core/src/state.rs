//! Behaviour shared by every namespace's state store.

use tokio::time::Instant;

/// Hooks the connection manager calls on a namespace store.
pub trait SessionStore: Send + 'static {
    /// Record an error for display.
    fn record_error(&mut self, message: String);

    /// Get the recorded error, if any.
    fn error(&self) -> Option<&str>;

    /// Clear flags that only make sense while connected.
    fn clear_transient(&mut self);

    /// Drop all session data (logout).
    fn clear(&mut self);

    /// Earliest timer the store wants to be ticked at.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }
}
