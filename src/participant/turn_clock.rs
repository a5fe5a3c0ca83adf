//! Turn clock.
//!
//! Follows `change_of_turn`: remembers whose turn it is and restarts a
//! per-second [`Countdown`] for the announced turn length.

use std::sync::{Arc, Mutex, PoisonError};

use crate::relay::{kind, ChangeOfTurn, Message, Registry, SubscriptionId};
use crate::timer::Countdown;

/// Whose turn the clock is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnIndicator {
    /// No turn announced yet.
    Waiting,
    /// This participant's turn.
    Yours,
    /// Another participant's turn.
    SomeoneElse,
}

impl std::fmt::Display for TurnIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting for the game to start."),
            Self::Yours => write!(f, "It's your turn!"),
            Self::SomeoneElse => write!(f, "It's someone else's turn."),
        }
    }
}

/// Turn indicator plus countdown.
#[derive(Debug)]
pub struct TurnClock {
    ego_id: String,
    indicator: Mutex<TurnIndicator>,
    countdown: Countdown,
}

impl TurnClock {
    /// Create a clock for participant `ego_id`. `on_tick` receives the
    /// remaining seconds each second.
    pub fn new<F>(ego_id: impl Into<String>, on_tick: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        Self {
            ego_id: ego_id.into(),
            indicator: Mutex::new(TurnIndicator::Waiting),
            countdown: Countdown::new(on_tick),
        }
    }

    /// Subscribe to `change_of_turn`. The registry holds the clock weakly.
    pub fn bind_events(self: &Arc<Self>, registry: &Registry) -> SubscriptionId {
        registry.subscribe_with(kind::CHANGE_OF_TURN, self, |clock, msg| {
            clock.change_of_turn(msg);
        })
    }

    /// React to a `change_of_turn` message. Must run inside a tokio runtime.
    pub fn change_of_turn(&self, message: &Message) {
        let turn = match message.parse::<ChangeOfTurn>() {
            Ok(turn) => turn,
            Err(e) => {
                log::warn!("[TurnClock] Ignoring change_of_turn: {}", e);
                return;
            }
        };
        let indicator = if turn.player_id == self.ego_id {
            TurnIndicator::Yours
        } else {
            TurnIndicator::SomeoneElse
        };
        *self.indicator.lock().unwrap_or_else(PoisonError::into_inner) = indicator;
        log::info!("[TurnClock] {} ({}s)", indicator, turn.turn_seconds);
        self.countdown.reset(turn.turn_seconds);
    }

    /// Current indicator.
    pub fn indicator(&self) -> TurnIndicator {
        *self.indicator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the last announced turn is ours.
    pub fn is_my_turn(&self) -> bool {
        self.indicator() == TurnIndicator::Yours
    }

    /// Seconds left in the current turn.
    pub fn remaining(&self) -> u64 {
        self.countdown.remaining()
    }

    /// Stop the countdown. Idempotent.
    pub fn stop(&self) {
        self.countdown.stop();
    }
}
