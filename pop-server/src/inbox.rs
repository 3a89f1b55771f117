//! Per-channel ordered message store used for catchup.
//!
//! Entries are append-only and replayed in admission order. Admission is
//! two-phase: [`Inbox::reserve`] claims a message id atomically (against
//! both stored and in-flight ids), the channel applies its state change,
//! then [`Reservation::commit`] appends the message and runs the fan-out
//! under the same lock. Append order therefore equals broadcast order.
//! Dropping an uncommitted reservation releases the id.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::error::HubError;
use crate::message::Message;

#[derive(Debug, Default)]
struct InboxState {
    messages: Vec<Message>,
    /// message_id -> position in `messages`
    index: HashMap<String, usize>,
    /// Ids reserved by admissions still in flight.
    pending: HashSet<String>,
}

#[derive(Debug)]
pub struct Inbox {
    channel: String,
    state: Mutex<InboxState>,
}

impl Inbox {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            state: Mutex::new(InboxState::default()),
        }
    }

    /// Append a message. Duplicate detection is the caller's job; a
    /// message whose id is already stored is ignored.
    pub fn store_message(&self, msg: Message) {
        let mut state = self.state.lock();
        if state.index.contains_key(&msg.message_id) {
            tracing::warn!(channel = %self.channel, message_id = %msg.message_id, "Message already stored, ignoring");
            return;
        }
        Self::append(&mut state, msg);
    }

    pub fn get_message(&self, id: &str) -> Option<Message> {
        let state = self.state.lock();
        state.index.get(id).map(|&i| state.messages[i].clone())
    }

    /// All stored messages in admission order.
    pub fn get_sorted_messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim `message_id` for an admission in progress.
    pub fn reserve(&self, message_id: &str) -> Result<Reservation<'_>, HubError> {
        let mut state = self.state.lock();
        if state.index.contains_key(message_id) || !state.pending.insert(message_id.to_string()) {
            return Err(HubError::DuplicateMessage(message_id.to_string()));
        }
        Ok(Reservation {
            inbox: self,
            message_id: message_id.to_string(),
            committed: false,
        })
    }

    fn append(state: &mut InboxState, msg: Message) {
        let position = state.messages.len();
        state.index.insert(msg.message_id.clone(), position);
        state.messages.push(msg);
    }
}

/// A claimed message id, released on drop unless committed.
#[derive(Debug)]
pub struct Reservation<'a> {
    inbox: &'a Inbox,
    message_id: String,
    committed: bool,
}

impl Reservation<'_> {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Store `msg` and run `fan_out` on it while the inbox lock is held.
    pub fn commit(mut self, msg: Message, fan_out: impl FnOnce(&Message)) -> Result<(), HubError> {
        if msg.message_id != self.message_id {
            return Err(HubError::Internal(format!(
                "reservation for {} committed with {}",
                self.message_id, msg.message_id
            )));
        }
        let mut state = self.inbox.state.lock();
        state.pending.remove(&self.message_id);
        Inbox::append(&mut state, msg);
        if let Some(stored) = state.messages.last() {
            fan_out(stored);
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.inbox.state.lock().pending.remove(&self.message_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(id: &str) -> Message {
        Message {
            data: "e30=".into(),
            sender: "sender".into(),
            signature: "sig".into(),
            message_id: id.into(),
            witness_signatures: vec![],
        }
    }

    #[test]
    fn sorted_messages_follow_admission_order() {
        let inbox = Inbox::new("/root/lao");
        for id in ["c", "a", "b"] {
            inbox.store_message(msg(id));
        }
        let ids: Vec<_> = inbox
            .get_sorted_messages()
            .into_iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        // Replay is stable across calls.
        assert_eq!(inbox.get_sorted_messages(), inbox.get_sorted_messages());
    }

    #[test]
    fn get_message_lookup() {
        let inbox = Inbox::new("/root/lao");
        inbox.store_message(msg("x"));
        assert!(inbox.get_message("x").is_some());
        assert!(inbox.get_message("y").is_none());
    }

    #[test]
    fn reserve_rejects_stored_and_pending_ids() {
        let inbox = Inbox::new("/root/lao");
        inbox.store_message(msg("stored"));
        assert!(matches!(inbox.reserve("stored"), Err(HubError::DuplicateMessage(_))));

        let first = inbox.reserve("new").unwrap();
        assert!(matches!(inbox.reserve("new"), Err(HubError::DuplicateMessage(_))));
        first.commit(msg("new"), |_| {}).unwrap();
        assert!(matches!(inbox.reserve("new"), Err(HubError::DuplicateMessage(_))));
        assert_eq!(inbox.len(), 2);
    }

    #[test]
    fn dropped_reservation_releases_id() {
        let inbox = Inbox::new("/root/lao");
        drop(inbox.reserve("id").unwrap());
        assert!(inbox.reserve("id").is_ok());
        assert!(inbox.is_empty());
    }

    #[test]
    fn commit_runs_fan_out_once() {
        let inbox = Inbox::new("/root/lao");
        let mut seen = Vec::new();
        inbox
            .reserve("m")
            .unwrap()
            .commit(msg("m"), |m| seen.push(m.message_id.clone()))
            .unwrap();
        assert_eq!(seen, vec!["m"]);
    }

    #[test]
    fn commit_with_wrong_id_fails() {
        let inbox = Inbox::new("/root/lao");
        let r = inbox.reserve("m").unwrap();
        assert!(r.commit(msg("other"), |_| {}).is_err());
        assert!(inbox.reserve("m").is_ok());
    }

    #[test]
    fn concurrent_reservations_admit_once() {
        let inbox = Arc::new(Inbox::new("/root/lao"));
        let admitted = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let inbox = Arc::clone(&inbox);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    if let Ok(r) = inbox.reserve("same") {
                        r.commit(msg("same"), |_| {}).unwrap();
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(inbox.len(), 1);
    }
}
