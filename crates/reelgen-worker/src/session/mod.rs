//! Conversational generation sessions.
//!
//! Transports turn chat updates into [`UserEvent`]s and feed them to the
//! [`SessionEngine`], which answers through the [`Transport`] seam.

mod engine;
mod events;
mod state;
mod transport;

pub use engine::{SessionDeps, SessionEngine, SessionSettings};
pub use events::{Choice, MenuOption, OutgoingMessage, UserEvent};
pub use state::{Draft, SessionState, Selections};
pub use transport::{LogTransport, Transport};

#[cfg(test)]
pub use transport::MockTransport;
