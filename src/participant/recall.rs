//! Recall display.
//!
//! Collects the words the server transmits to this participant. A
//! `word_transmitted` message is meant for us when we wrote it or when we
//! are among its recipients; anything else is ignored.

use std::sync::{Arc, Mutex, PoisonError};

use crate::relay::{kind, Message, Registry, SubscriptionId, WordTransmitted};
use crate::session::SharedSession;

/// Who produced a recalled word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordOrigin {
    /// Submitted by this participant.
    Mine,
    /// Submitted by the named participant.
    Peer(String),
}

/// One entry in the recall list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalledWord {
    /// The word.
    pub word: String,
    /// Who submitted it.
    pub origin: WordOrigin,
}

/// List of recalled words, fed by `word_transmitted`.
pub struct RecallDisplay {
    session: SharedSession,
    entries: Mutex<Vec<RecalledWord>>,
    on_word: Box<dyn Fn(&RecalledWord) + Send + Sync>,
}

impl std::fmt::Debug for RecallDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecallDisplay")
            .field("entries", &self.entries())
            .finish_non_exhaustive()
    }
}

impl RecallDisplay {
    /// Create a display; `on_word` runs for each newly listed word.
    pub fn new<F>(session: SharedSession, on_word: F) -> Self
    where
        F: Fn(&RecalledWord) + Send + Sync + 'static,
    {
        Self {
            session,
            entries: Mutex::new(Vec::new()),
            on_word: Box::new(on_word),
        }
    }

    /// Subscribe to `word_transmitted`. The registry holds the display
    /// weakly.
    pub fn bind_events(self: &Arc<Self>, registry: &Registry) -> SubscriptionId {
        registry.subscribe_with(kind::WORD_TRANSMITTED, self, |display, msg| {
            display.update_word_list(msg);
        })
    }

    /// React to a `word_transmitted` message.
    ///
    /// Returns the new entry if the word was listed.
    pub fn update_word_list(&self, message: &Message) -> Option<RecalledWord> {
        let transmitted = match message.parse::<WordTransmitted>() {
            Ok(t) => t,
            Err(e) => {
                log::warn!("[Recall] Ignoring word_transmitted: {}", e);
                return None;
            }
        };

        let word = transmitted.word.trim().to_lowercase();
        let origin = {
            let mut session = self.session.lock();
            let mine = session.is_me(&transmitted.author);
            let intended = mine || transmitted.recipients.iter().any(|r| session.is_me(r));
            if !intended {
                log::debug!("[Recall] '{}' not intended for us", word);
                return None;
            }
            // Our own words were recorded at submit time; this is a no-op then.
            session.words.add(&word);
            if mine {
                WordOrigin::Mine
            } else {
                WordOrigin::Peer(transmitted.author)
            }
        };

        let entry = RecalledWord { word, origin };
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.iter().any(|e| e.word == entry.word) {
                return None;
            }
            entries.push(entry.clone());
        }
        (self.on_word)(&entry);
        Some(entry)
    }

    /// Snapshot of the listed words.
    pub fn entries(&self) -> Vec<RecalledWord> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use serde_json::json;

    fn transmitted(word: &str, author: &str, recipients: &[&str]) -> Message {
        let encoded = serde_json::to_string(recipients).unwrap();
        serde_json::from_value(json!({
            "type": "word_transmitted",
            "word": word,
            "author": author,
            "recipients": encoded,
        }))
        .unwrap()
    }

    #[test]
    fn test_word_for_me_is_listed_and_recorded() {
        let session = Session::new("7").shared();
        let display = RecallDisplay::new(session.clone(), |_| {});

        let entry = display.update_word_list(&transmitted("Apple", "3", &["3", "7"]));
        assert_eq!(
            entry,
            Some(RecalledWord {
                word: "apple".into(),
                origin: WordOrigin::Peer("3".into()),
            })
        );
        assert!(session.lock().words.contains("apple"));
    }

    #[test]
    fn test_word_for_others_is_ignored() {
        let session = Session::new("7").shared();
        let display = RecallDisplay::new(session.clone(), |_| {});

        assert!(display
            .update_word_list(&transmitted("apple", "3", &["3", "5"]))
            .is_none());
        assert!(display.entries().is_empty());
        assert!(session.lock().words.is_empty());
    }

    #[test]
    fn test_recipient_match_is_exact() {
        let session = Session::new("7").shared();
        let display = RecallDisplay::new(session, |_| {});
        assert!(display
            .update_word_list(&transmitted("apple", "3", &["3", "17"]))
            .is_none());
    }

    #[test]
    fn test_own_word_listed_once_as_mine() {
        let session = Session::new("7").shared();
        session.lock().words.add("plum");
        let listed = Arc::new(Mutex::new(0));
        let l = Arc::clone(&listed);
        let display = RecallDisplay::new(session, move |_| *l.lock().unwrap() += 1);

        let first = display.update_word_list(&transmitted("plum", "7", &["7", "3"]));
        assert_eq!(first.map(|e| e.origin), Some(WordOrigin::Mine));
        assert!(display
            .update_word_list(&transmitted("plum", "7", &["7", "3"]))
            .is_none());
        assert_eq!(*listed.lock().unwrap(), 1);
    }

    #[test]
    fn test_bound_display_receives_published_words() {
        let session = Session::new("7").shared();
        let display = Arc::new(RecallDisplay::new(session, |_| {}));
        let registry = Registry::new();
        display.bind_events(&registry);

        registry.publish(&transmitted("fig", "2", &["2", "7"]));
        registry.publish(&transmitted("kiwi", "2", &["2", "9"]));
        let words: Vec<String> = display.entries().into_iter().map(|e| e.word).collect();
        assert_eq!(words, vec!["fig"]);
    }
}
