//! Participant-side components layered on the relay.
//!
//! Each component subscribes to the message types it cares about and owns
//! its own slice of state; they share the [`SharedSession`] and talk to the
//! server through a [`MessageSink`].
//!
//! - [`TurnClock`] - whose turn it is and how long is left
//! - [`RecallDisplay`] - words transmitted to this participant
//! - [`SubmitsWords`] - word entry, either [`TurnBasedSubmission`] or
//!   [`FreeForAllSubmission`]
//!
//! [`SharedSession`]: crate::session::SharedSession

pub mod recall;
pub mod submission;
pub mod turn_clock;

pub use recall::{RecallDisplay, RecalledWord, WordOrigin};
pub use submission::{FreeForAllSubmission, SubmitsWords, TurnBasedSubmission, WordSender};
pub use turn_clock::{TurnClock, TurnIndicator};

use crate::relay::{Message, PubSubSocket, Relay, RelayError};

/// Outbound side of the relay as seen by components.
pub trait MessageSink: Send + Sync {
    /// Send `message` on the control channel.
    fn deliver(&self, message: Message) -> Result<(), RelayError>;
}

impl MessageSink for Relay {
    fn deliver(&self, message: Message) -> Result<(), RelayError> {
        self.send(&message)
    }
}

impl MessageSink for PubSubSocket {
    fn deliver(&self, message: Message) -> Result<(), RelayError> {
        self.send(&message)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records everything it is asked to send.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) sent: Mutex<Vec<Message>>,
    }

    impl RecordingSink {
        pub(crate) fn kinds(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.kind.clone()).collect()
        }
    }

    impl MessageSink for RecordingSink {
        fn deliver(&self, message: Message) -> Result<(), RelayError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }
}
