//! Word submission.
//!
//! [`SubmitsWords`] is the capability the input control exposes. Two
//! variants implement it independently:
//!
//! - [`TurnBasedSubmission`] starts disabled and follows `change_of_turn`:
//!   enabled only while it is this participant's turn. It can pass.
//! - [`FreeForAllSubmission`] is enabled from the start and ignores turns.
//!
//! Both delegate the validate-record-send step to a shared [`WordSender`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::relay::{
    kind, ChangeOfTurn, Disconnect, Message, Registry, SkipTurn, SubscriptionId, WordAdded,
};
use crate::session::SharedSession;

use super::MessageSink;

/// Records a candidate word in the session and reports it to the server.
#[derive(Clone)]
pub struct WordSender {
    session: SharedSession,
    sink: Arc<dyn MessageSink>,
}

impl std::fmt::Debug for WordSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordSender")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl WordSender {
    /// Create a sender for `session` writing to `sink`.
    pub fn new(session: SharedSession, sink: Arc<dyn MessageSink>) -> Self {
        Self { session, sink }
    }

    /// Session this sender records into.
    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Validate `raw`, record it, and send `word_added`.
    ///
    /// Returns the normalised word, or `None` if it was empty, contained a
    /// space, or was already recalled.
    pub fn send_word(&self, raw: &str) -> Option<String> {
        let (word, author) = {
            let mut session = self.session.lock();
            let word = session.words.add(raw)?;
            (word, session.ego_id().to_string())
        };
        self.emit(WordAdded {
            word: word.clone(),
            author,
        });
        Some(word)
    }

    /// Send `disconnect` with every recalled word.
    pub fn send_disconnect(&self) {
        let leave = {
            let session = self.session.lock();
            Disconnect {
                player_id: session.ego_id().to_string(),
                words: session.words.retrieve(),
            }
        };
        self.emit(leave);
    }

    /// Send an arbitrary message, logging failures.
    pub fn emit(&self, message: impl Into<Message>) {
        let message = message.into();
        let kind = message.kind.clone();
        if let Err(e) = self.sink.deliver(message) {
            log::warn!("[Submission] Failed to send '{}': {}", kind, e);
        }
    }
}

/// Word entry control.
pub trait SubmitsWords: Send + Sync {
    /// Allow submissions.
    fn enable(&self);

    /// Refuse submissions.
    fn disable(&self);

    /// Whether submissions are currently accepted.
    fn is_enabled(&self) -> bool;

    /// Subscribe to the messages this variant reacts to.
    ///
    /// The registry holds the component weakly.
    fn bind_events(self: Arc<Self>, registry: &Registry) -> Vec<SubscriptionId>;

    /// Submit raw input. `None` when disabled or the word is rejected.
    fn submit(&self, raw: &str) -> Option<String>;

    /// Pass on the current turn. Returns `false` where passing does not
    /// apply.
    fn skip_turn(&self) -> bool {
        false
    }

    /// Report the recalled words and leave.
    fn leave(&self);
}

/// Submission gated by turns.
#[derive(Debug)]
pub struct TurnBasedSubmission {
    enabled: AtomicBool,
    sender: WordSender,
}

impl TurnBasedSubmission {
    /// Create a control that waits for the first turn announcement.
    pub fn new(sender: WordSender) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sender,
        }
    }

    /// React to a `change_of_turn` message.
    pub fn change_of_turn(&self, message: &Message) {
        let turn = match message.parse::<ChangeOfTurn>() {
            Ok(turn) => turn,
            Err(e) => {
                log::warn!("[Submission] Ignoring change_of_turn: {}", e);
                return;
            }
        };
        let mine = {
            let mut session = self.sender.session().lock();
            let mine = session.is_me(&turn.player_id);
            session.current_player = Some(turn.player_id);
            mine
        };
        if mine {
            log::info!("[Submission] It's our turn.");
            self.enable();
        } else {
            log::info!("[Submission] It's not our turn.");
            self.disable();
        }
    }
}

impl SubmitsWords for TurnBasedSubmission {
    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn bind_events(self: Arc<Self>, registry: &Registry) -> Vec<SubscriptionId> {
        vec![registry.subscribe_with(kind::CHANGE_OF_TURN, &self, |me, msg| {
            me.change_of_turn(msg);
        })]
    }

    fn submit(&self, raw: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        self.sender.send_word(raw)
    }

    fn skip_turn(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.sender.emit(SkipTurn {});
        true
    }

    fn leave(&self) {
        self.disable();
        self.sender.send_disconnect();
    }
}

/// Submission open to everyone at any time.
#[derive(Debug)]
pub struct FreeForAllSubmission {
    enabled: AtomicBool,
    sender: WordSender,
}

impl FreeForAllSubmission {
    /// Create an enabled control.
    pub fn new(sender: WordSender) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            sender,
        }
    }
}

impl SubmitsWords for FreeForAllSubmission {
    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn bind_events(self: Arc<Self>, _registry: &Registry) -> Vec<SubscriptionId> {
        Vec::new()
    }

    fn submit(&self, raw: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        self.sender.send_word(raw)
    }

    fn leave(&self) {
        self.disable();
        self.sender.send_disconnect();
    }
}
