//! Traits shared by every namespace's event and command enums.

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Validate;

/// An event pushed by the server.
pub trait InboundEvent: DeserializeOwned + Validate + Debug + Send + Sync + 'static {
    /// Discriminant used to route the event to its handlers.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Get the event kind.
    fn kind(&self) -> Self::Kind;

    /// Get the wire name of the event.
    fn name(&self) -> &'static str;
}

/// A command sent by the client.
pub trait OutboundCommand: Serialize + Debug + Send + Sync + 'static {
    /// Get the wire name of the command.
    fn name(&self) -> &'static str;
}
