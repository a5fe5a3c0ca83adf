//! Recall Relay - channel-multiplexed websocket relay for word-recall
//! experiments.
//!
//! One websocket to the experiment server carries several named channels.
//! A participant client listens on a broadcast channel, writes to a control
//! channel, and routes each inbound message to local subscribers by type.
//!
//! # Modules
//!
//! - [`relay`] - framed connection, channel codec, dispatch and registry
//! - [`participant`] - word submission, turn clock and recall display
//! - [`session`] - per-participant state shared by the components
//! - [`timer`] - cancellable scheduled tasks and the turn countdown
//! - [`config`] - configuration loading/saving
//! - [`ws`] - websocket transport

pub mod config;
pub mod participant;
pub mod relay;
pub mod session;
pub mod timer;
pub mod ws;

// Re-export commonly used types
pub use config::RelayConfig;
pub use relay::{
    ChannelBinding, Message, PubSubSocket, Registry, Relay, RelayError, RelaySettings,
};
pub use session::{Session, SharedSession, UniqueWords};
