//! Channel-multiplexed websocket relay.
//!
//! One websocket carries several logical channels. A relay reads one
//! broadcast channel and writes one control channel, and turns the frames
//! it accepts into [`Message`]s for local subscribers.
//!
//! # Architecture
//!
//! ```text
//! PubSubSocket / Relay
//!     ├── Connection   (reconnecting websocket, raw text frames)
//!     ├── ChannelBinding (`<channel>:<json>` codec)
//!     └── Dispatch
//!         ├── DispatchTable (one handler per type)
//!         └── Registry      (many subscribers per type)
//! ```
//!
//! # Error policy
//!
//! Wrong-channel frames, malformed JSON and unknown message types are
//! logged and dropped. Transport drops are retried by the connection.
//! Callers only see serialization failures, shutdown, and the optional
//! open timeout.

pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod message;
pub mod registry;
pub mod socket;

pub use codec::{ChannelBinding, FrameError, DEFAULT_LAG_TOLERANCE};
pub use connection::{BackoffPolicy, Connection, ConnectionClosed, ConnectionState};
pub use dispatch::{Dispatch, DispatchOutcome, DispatchTable};
pub use message::{
    kind, ChangeOfTurn, Connect, Disconnect, Message, SkipTurn, WordAdded, WordTransmitted,
};
pub use registry::{Registry, SubscriptionId};
pub use socket::{deliver_frame, FrameOutcome, PubSubSocket, Relay, RelayError, RelaySettings};
