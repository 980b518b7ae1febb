//! # courier-core
//!
//! Session state and event routing for the Courier realtime client.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **EventRouter** - Binds inbound events to state mutations
//! - **ChatStore** - Conversation session state (messages, unread, typing)
//! - **TrackingStore** - Driver order requests and order tracking
//! - **OnlineUsers** - Presence set
//! - **TypingIndicators** - Expiring typing state and outgoing debounce
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Channel   │────▶│ EventRouter │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                                ▼
//!                                         ┌─────────────┐
//!                                         │     UI      │
//!                                         └─────────────┘
//! ```

pub mod presence;
pub mod router;
pub mod state;
pub mod store;
pub mod tracking;
pub mod typing;

pub use presence::{OnlineUsers, PresenceState};
pub use router::{EventRouter, Handler, RouterStats};
pub use state::SessionStore;
pub use store::{AddOutcome, ChatStore, PendingSend};
pub use tracking::{OrderRequestQueue, PendingRequest, TrackingStore, DEFAULT_REQUEST_WINDOW};
pub use typing::{TypingDebounce, TypingIndicator, TypingIndicators, DEFAULT_TYPING_TIMEOUT};
