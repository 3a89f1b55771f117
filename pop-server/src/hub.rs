//! Hub: resolves channel paths and routes JSON-RPC queries to channels.
//!
//! Channel paths:
//! - `/root/<lao_id>`: a LAO. Only `election#setup` publishes are handled
//!   here; they create the election channel.
//! - `/root/<lao_id>/<election_id>`: an election channel.
//!
//! LAOs (organizer key + attendee set) are registered at startup from the
//! configuration; elections are created at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;

use crate::channel::election::{Attendees, ElectionChannel};
use crate::channel::{self, Channel};
use crate::crypto::{self, ServerKeys};
use crate::error::HubError;
use crate::message::Message;
use crate::messagedata::{self, ACTION_SETUP, ElectionSetup, OBJECT_ELECTION};
use crate::rpc::{Answer, Query};
use crate::schema::SchemaValidator;
use crate::sockets::Socket;

pub const ROOT: &str = "/root";

struct Lao {
    /// Shared with the LAO's elections.
    organizer: Arc<RwLock<VerifyingKey>>,
    attendees: Arc<Attendees>,
}

pub struct Hub {
    server_keys: Arc<ServerKeys>,
    schema: Arc<dyn SchemaValidator>,
    /// channel path -> channel
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
    /// lao id -> LAO
    laos: RwLock<HashMap<String, Lao>>,
}

pub fn lao_path(lao_id: &str) -> String {
    format!("{ROOT}/{lao_id}")
}

pub fn election_path(lao_id: &str, election_id: &str) -> String {
    format!("{ROOT}/{lao_id}/{election_id}")
}

/// Election ids are `hash("Election", lao, created_at, name)`.
pub fn election_id(lao_id: &str, created_at: i64, name: &str) -> String {
    crypto::hash(&["Election", lao_id, &created_at.to_string(), name])
}

/// Question ids are `hash("Question", election_id, question)`.
pub fn question_id(election_id: &str, question: &str) -> String {
    crypto::hash(&["Question", election_id, question])
}

impl Hub {
    pub fn new(server_keys: Arc<ServerKeys>, schema: Arc<dyn SchemaValidator>) -> Self {
        Self {
            server_keys,
            schema,
            channels: RwLock::new(HashMap::new()),
            laos: RwLock::new(HashMap::new()),
        }
    }

    pub fn server_keys(&self) -> &Arc<ServerKeys> {
        &self.server_keys
    }

    /// Register a LAO. Re-registering replaces the organizer and merges
    /// the attendees into the existing set; both changes apply to the
    /// LAO's existing elections.
    pub fn register_lao(
        &self,
        lao_id: &str,
        organizer: VerifyingKey,
        attendees: impl IntoIterator<Item = String>,
    ) {
        let mut laos = self.laos.write();
        match laos.get_mut(lao_id) {
            Some(lao) => {
                *lao.organizer.write() = organizer;
                for key in attendees {
                    lao.attendees.add(key);
                }
            }
            None => {
                laos.insert(
                    lao_id.to_string(),
                    Lao {
                        organizer: Arc::new(RwLock::new(organizer)),
                        attendees: Arc::new(Attendees::new(attendees)),
                    },
                );
            }
        }
        tracing::info!(lao = %lao_id, "Registered LAO");
    }

    /// Add attendees to a LAO; visible to its existing elections.
    pub fn add_attendees(
        &self,
        lao_id: &str,
        keys: impl IntoIterator<Item = String>,
    ) -> Result<(), HubError> {
        let laos = self.laos.read();
        let lao = laos
            .get(lao_id)
            .ok_or_else(|| HubError::UnknownChannel(lao_path(lao_id)))?;
        for key in keys {
            lao.attendees.add(key);
        }
        Ok(())
    }

    pub fn channel(&self, path: &str) -> Option<Arc<dyn Channel>> {
        self.channels.read().get(path).cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Create an election channel from an `election#setup` published on a
    /// LAO path. The setup message becomes the first entry of its inbox.
    pub fn setup_election(
        &self,
        lao_path: &str,
        msg: Message,
    ) -> Result<Arc<ElectionChannel>, HubError> {
        let (data, sender) = channel::verify_envelope(&msg, self.schema.as_ref())?;
        let setup: ElectionSetup = match messagedata::ElectionData::decode(&data)? {
            messagedata::ElectionData::Setup(setup) => setup,
            _ => {
                return Err(HubError::InvalidRequest(format!(
                    "only election#setup can be published on {lao_path}"
                )));
            }
        };
        tracing::info!(channel = %lao_path, election = %setup.id, "Received an election#setup message");

        let lao_id = lao_path
            .strip_prefix(ROOT)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| HubError::UnknownChannel(lao_path.to_string()))?;
        let (organizer, attendees) = {
            let laos = self.laos.read();
            let lao = laos
                .get(lao_id)
                .ok_or_else(|| HubError::UnknownChannel(lao_path.to_string()))?;
            (Arc::clone(&lao.organizer), Arc::clone(&lao.attendees))
        };

        if sender != *organizer.read() {
            return Err(HubError::Unauthorized(format!(
                "sender is {}, should be the organizer",
                msg.sender
            )));
        }
        verify_setup(lao_id, &setup)?;

        let path = election_path(lao_id, &setup.id);
        let mut channels = self.channels.write();
        if channels.contains_key(&path) {
            return Err(HubError::DuplicateMessage(format!("election {}", setup.id)));
        }
        let election = Arc::new(ElectionChannel::new(
            path.clone(),
            &setup,
            attendees,
            organizer,
            Arc::clone(&self.server_keys),
            Arc::clone(&self.schema),
        ));
        election.core().inbox().store_message(msg);
        channels.insert(path.clone(), Arc::clone(&election) as Arc<dyn Channel>);
        tracing::info!(channel = %path, "Created election channel");
        Ok(election)
    }

    /// Run one query. Notifications (broadcast without id) yield no answer
    /// unless they fail.
    pub fn handle_query(&self, query: Query, socket: &Socket) -> Option<Answer> {
        let id = query.id();
        let outcome = self.dispatch(&query, socket);
        match outcome {
            Ok(answer) => {
                if id.is_none() {
                    None
                } else {
                    Some(answer)
                }
            }
            Err(e) => {
                tracing::warn!(
                    channel = %query.channel(),
                    method = query.method(),
                    code = e.code(),
                    "Query failed: {e}"
                );
                Some(Answer::error(id, &e))
            }
        }
    }

    /// Parse and run one raw request line.
    pub fn handle_line(&self, line: &str, socket: &Socket) -> Option<Answer> {
        match Query::parse(line) {
            Ok(query) => self.handle_query(query, socket),
            Err(e) => {
                tracing::debug!(socket = %socket.id(), "Rejected request: {e}");
                Some(Answer::error(None, &e))
            }
        }
    }

    /// Drop a closed connection from every channel.
    pub fn remove_socket(&self, socket_id: &str) {
        for channel in self.channels.read().values() {
            channel.remove_socket(socket_id);
        }
    }

    fn dispatch(&self, query: &Query, socket: &Socket) -> Result<Answer, HubError> {
        let path = query.channel();
        let channel = match self.channel(path) {
            Some(channel) => channel,
            None => return self.dispatch_lao(query, path),
        };

        match query {
            Query::Subscribe(q) => {
                channel.subscribe(socket.clone(), q)?;
                Ok(Answer::ok(Some(q.id)))
            }
            Query::Unsubscribe(q) => {
                channel.unsubscribe(socket.id(), q)?;
                Ok(Answer::ok(Some(q.id)))
            }
            Query::Publish(q) => {
                channel.publish(q)?;
                Ok(Answer::ok(Some(q.id)))
            }
            Query::Broadcast(q) => {
                channel.broadcast(q)?;
                Ok(Answer::ok(q.id))
            }
            Query::Catchup(q) => Ok(Answer::messages(Some(q.id), channel.catchup(q))),
        }
    }

    /// Queries on a path with no channel: only election setup on a LAO.
    fn dispatch_lao(&self, query: &Query, path: &str) -> Result<Answer, HubError> {
        let (msg, id) = match query {
            Query::Publish(q) => (&q.params.message, Some(q.id)),
            Query::Broadcast(q) => (&q.params.message, q.id),
            _ => return Err(HubError::UnknownChannel(path.to_string())),
        };
        let is_lao = path
            .strip_prefix(ROOT)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|lao_id| self.laos.read().contains_key(lao_id));
        if !is_lao {
            return Err(HubError::UnknownChannel(path.to_string()));
        }

        let data = msg.decode_data()?;
        let (object, action) = messagedata::object_and_action(&data)?;
        if object != OBJECT_ELECTION || action != ACTION_SETUP {
            return Err(HubError::InvalidRequest(format!(
                "{object}#{action} is not handled on {path}"
            )));
        }
        self.setup_election(path, msg.clone())?;
        Ok(Answer::ok(id))
    }
}

/// Content checks of an election setup against its LAO.
fn verify_setup(lao_id: &str, setup: &ElectionSetup) -> Result<(), HubError> {
    if setup.lao != lao_id {
        return Err(HubError::InvalidRequest(format!(
            "lao id is {}, should be {lao_id}",
            setup.lao
        )));
    }
    let expected = election_id(lao_id, setup.created_at, &setup.name);
    if setup.id != expected {
        return Err(HubError::InvalidRequest(format!(
            "election id is {}, should be {expected}",
            setup.id
        )));
    }
    if setup.end_time < setup.start_time {
        return Err(HubError::InvalidRequest(
            "election end time is before its start time".into(),
        ));
    }
    if setup.questions.is_empty() {
        return Err(HubError::InvalidRequest("election has no questions".into()));
    }
    let mut seen = std::collections::HashSet::new();
    for q in &setup.questions {
        let expected = question_id(&setup.id, &q.question);
        if q.id != expected {
            return Err(HubError::InvalidRequest(format!(
                "question id is {}, should be {expected}",
                q.id
            )));
        }
        if !seen.insert(q.id.as_str()) {
            return Err(HubError::InvalidRequest(format!("duplicate question id {}", q.id)));
        }
        if q.ballot_options.is_empty() {
            return Err(HubError::InvalidRequest(format!(
                "question {} has no ballot options",
                q.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StructuralValidator;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn hub() -> Hub {
        Hub::new(Arc::new(ServerKeys::generate()), Arc::new(StructuralValidator))
    }

    fn setup_msg(organizer: &SigningKey, lao: &str, name: &str) -> (String, Message) {
        let id = election_id(lao, 1000, name);
        let payload = json!({
            "object": "election",
            "action": "setup",
            "version": "OPEN_BALLOT",
            "id": id,
            "lao": lao,
            "name": name,
            "created_at": 1000,
            "start_time": 1000,
            "end_time": 2000,
            "questions": [{
                "id": question_id(&id, "Colour?"),
                "question": "Colour?",
                "voting_method": "Plurality",
                "ballot_options": ["red", "blue"],
                "write_in": false,
            }],
        });
        let msg = Message::sign(&serde_json::to_vec(&payload).unwrap(), organizer);
        (id, msg)
    }

    #[test]
    fn setup_creates_election_channel() {
        let hub = hub();
        let organizer = SigningKey::generate(&mut OsRng);
        hub.register_lao("L", organizer.verifying_key(), vec![]);

        let (id, msg) = setup_msg(&organizer, "L", "Board");
        let election = hub.setup_election(&lao_path("L"), msg.clone()).unwrap();
        assert_eq!(election.election_id(), id);
        assert_eq!(election.core().inbox().get_sorted_messages(), vec![msg]);
        assert!(hub.channel(&election_path("L", &id)).is_some());
    }

    #[test]
    fn setup_from_non_organizer_rejected() {
        let hub = hub();
        let organizer = SigningKey::generate(&mut OsRng);
        let intruder = SigningKey::generate(&mut OsRng);
        hub.register_lao("L", organizer.verifying_key(), vec![]);

        let (_, msg) = setup_msg(&intruder, "L", "Board");
        let err = hub.setup_election(&lao_path("L"), msg).unwrap_err();
        assert!(matches!(err, HubError::Unauthorized(_)));
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn setup_twice_is_duplicate() {
        let hub = hub();
        let organizer = SigningKey::generate(&mut OsRng);
        hub.register_lao("L", organizer.verifying_key(), vec![]);

        let (_, msg) = setup_msg(&organizer, "L", "Board");
        hub.setup_election(&lao_path("L"), msg.clone()).unwrap();
        let err = hub.setup_election(&lao_path("L"), msg).unwrap_err();
        assert_eq!(err.code(), -3);
    }

    #[test]
    fn setup_on_unknown_lao_rejected() {
        let hub = hub();
        let organizer = SigningKey::generate(&mut OsRng);
        let (_, msg) = setup_msg(&organizer, "L", "Board");
        let err = hub.setup_election(&lao_path("L"), msg).unwrap_err();
        assert!(matches!(err, HubError::UnknownChannel(_)));
    }

    #[test]
    fn setup_with_forged_id_rejected() {
        let hub = hub();
        let organizer = SigningKey::generate(&mut OsRng);
        hub.register_lao("L", organizer.verifying_key(), vec![]);
        let payload = json!({
            "object": "election", "action": "setup", "version": "OPEN_BALLOT",
            "id": "not-the-hash", "lao": "L", "name": "x",
            "created_at": 1, "start_time": 1, "end_time": 2,
            "questions": [{"id": "q", "question": "?", "voting_method": "Plurality",
                           "ballot_options": ["a"], "write_in": false}],
        });
        let msg = Message::sign(&serde_json::to_vec(&payload).unwrap(), &organizer);
        let err = hub.setup_election(&lao_path("L"), msg).unwrap_err();
        assert!(matches!(err, HubError::InvalidRequest(_)));
    }

    #[test]
    fn setup_with_bad_question_id_rejected() {
        let hub = hub();
        let organizer = SigningKey::generate(&mut OsRng);
        hub.register_lao("L", organizer.verifying_key(), vec![]);
        let id = election_id("L", 1, "x");
        for bad in ["q".to_string(), question_id(&id, "another question")] {
            let payload = json!({
                "object": "election", "action": "setup", "version": "OPEN_BALLOT",
                "id": id, "lao": "L", "name": "x",
                "created_at": 1, "start_time": 1, "end_time": 2,
                "questions": [{"id": bad, "question": "?", "voting_method": "Plurality",
                               "ballot_options": ["a"], "write_in": false}],
            });
            let msg = Message::sign(&serde_json::to_vec(&payload).unwrap(), &organizer);
            let err = hub.setup_election(&lao_path("L"), msg).unwrap_err();
            assert!(matches!(err, HubError::InvalidRequest(_)), "{err:?}");
        }
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn organizer_change_applies_to_existing_elections() {
        let hub = hub();
        let old = SigningKey::generate(&mut OsRng);
        let new = SigningKey::generate(&mut OsRng);
        hub.register_lao("L", old.verifying_key(), vec![]);
        let (id, msg) = setup_msg(&old, "L", "Board");
        let election = hub.setup_election(&lao_path("L"), msg).unwrap();

        hub.register_lao("L", new.verifying_key(), vec![]);
        let open = |key: &SigningKey| {
            let payload = json!({
                "object": "election", "action": "open", "lao": "L",
                "election": id, "opened_at": 1000,
            });
            Message::sign(&serde_json::to_vec(&payload).unwrap(), key)
        };
        let err = election.process(open(&old)).unwrap_err();
        assert!(matches!(err, HubError::Unauthorized(_)));
        election.process(open(&new)).unwrap();
        assert!(election.started());
    }

    #[test]
    fn unknown_channel_query_answers_minus_two() {
        let hub = hub();
        let (tx, _rx) = mpsc::channel(8);
        let socket = Socket::new("s", tx);
        let line = r#"{"jsonrpc":"2.0","method":"subscribe","id":1,"params":{"channel":"/root/nope"}}"#;
        let answer = hub.handle_line(line, &socket).unwrap();
        assert_eq!(answer.error.unwrap().code, -2);
    }

    #[test]
    fn attendees_added_later_are_shared() {
        let hub = hub();
        let organizer = SigningKey::generate(&mut OsRng);
        hub.register_lao("L", organizer.verifying_key(), vec![]);
        let (_, msg) = setup_msg(&organizer, "L", "Board");
        let election = hub.setup_election(&lao_path("L"), msg).unwrap();

        hub.add_attendees("L", vec!["voter-key".to_string()]).unwrap();
        assert!(election.attendees().is_present("voter-key"));
    }
}
