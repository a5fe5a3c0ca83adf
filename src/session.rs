//! Per-participant session state.
//!
//! One [`Session`] per running client, shared between components as a
//! [`SharedSession`]. Components receive it at construction; nothing in the
//! crate keeps session state in globals.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Words recalled so far, normalised and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueWords {
    words: Vec<String>,
}

impl UniqueWords {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalise and record `raw`.
    ///
    /// The word is lowercased and trimmed. Empty words, words containing a
    /// space and words already recorded are rejected with `None`; otherwise
    /// the normalised word is returned.
    pub fn add(&mut self, raw: &str) -> Option<String> {
        let word = raw.trim().to_lowercase();
        if word.is_empty() || word.contains(' ') || self.contains(&word) {
            return None;
        }
        self.words.push(word.clone());
        Some(word)
    }

    /// Whether `word` (already normalised) is recorded.
    pub fn contains(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }

    /// Copy of the recorded words, in the order they were added.
    pub fn retrieve(&self) -> Vec<String> {
        self.words.clone()
    }

    /// Number of recorded words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// State of one participant's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    ego_id: String,
    /// Host node created for this participant, once known.
    pub node_id: Option<u64>,
    /// Participant whose turn it currently is, once announced.
    pub current_player: Option<String>,
    /// Words recalled by or transmitted to this participant.
    pub words: UniqueWords,
}

impl Session {
    /// Start a session for participant `ego_id`.
    pub fn new(ego_id: impl Into<String>) -> Self {
        Self {
            ego_id: ego_id.into(),
            node_id: None,
            current_player: None,
            words: UniqueWords::new(),
        }
    }

    /// This participant's id.
    pub fn ego_id(&self) -> &str {
        &self.ego_id
    }

    /// Whether `player_id` is this participant.
    pub fn is_me(&self, player_id: &str) -> bool {
        self.ego_id == player_id
    }

    /// Whether the last announced turn belongs to this participant.
    pub fn is_my_turn(&self) -> bool {
        self.current_player.as_deref() == Some(self.ego_id.as_str())
    }

    /// Wrap for sharing between components.
    pub fn shared(self) -> SharedSession {
        SharedSession(Arc::new(Mutex::new(self)))
    }
}

/// Session shared between components.
#[derive(Debug, Clone)]
pub struct SharedSession(Arc<Mutex<Session>>);

impl SharedSession {
    /// Lock the session for reading or mutation.
    ///
    /// A component that panicked while holding the lock leaves the data
    /// usable; poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// This participant's id.
    pub fn ego_id(&self) -> String {
        self.lock().ego_id().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_normalises_case_and_whitespace() {
        let mut words = UniqueWords::new();
        assert_eq!(words.add("  Apple \n"), Some("apple".to_string()));
        assert_eq!(words.retrieve(), vec!["apple"]);
    }

    #[test]
    fn test_add_rejects_empty() {
        let mut words = UniqueWords::new();
        assert_eq!(words.add(""), None);
        assert_eq!(words.add("   "), None);
        assert!(words.is_empty());
    }

    #[test]
    fn test_add_rejects_inner_space() {
        let mut words = UniqueWords::new();
        assert_eq!(words.add("ice cream"), None);
        assert!(words.is_empty());
    }

    #[test]
    fn test_add_rejects_duplicates_after_normalising() {
        let mut words = UniqueWords::new();
        assert!(words.add("pear").is_some());
        assert_eq!(words.add("PEAR"), None);
        assert_eq!(words.add(" pear"), None);
        assert_eq!(words.len(), 1);
    }

    #[test]
    fn test_retrieve_is_a_copy_in_order() {
        let mut words = UniqueWords::new();
        words.add("plum");
        words.add("fig");
        let mut copy = words.retrieve();
        copy.push("kiwi".into());
        assert_eq!(words.retrieve(), vec!["plum", "fig"]);
    }

    #[test]
    fn test_turn_tracking() {
        let mut session = Session::new("7");
        assert!(!session.is_my_turn());
        session.current_player = Some("3".into());
        assert!(!session.is_my_turn());
        session.current_player = Some("7".into());
        assert!(session.is_my_turn());
        assert!(session.is_me("7"));
    }

    #[test]
    fn test_shared_session_sees_mutation() {
        let shared = Session::new("7").shared();
        let other = shared.clone();
        other.lock().words.add("grape");
        assert!(shared.lock().words.contains("grape"));
        assert_eq!(shared.ego_id(), "7");
    }
}
