//! Shared state and messaging between the workers and the front end
//!
//! Workers publish [`UiEvent`]s over a bounded channel and keep a
//! [`RuntimeState`] snapshot current behind a lock, so any presentation layer
//! can either react to events or poll the state. Undrained events are evicted
//! oldest first.

pub mod messages;
pub mod state;

pub use messages::{EventSender, UiEvent};
pub use state::RuntimeState;
