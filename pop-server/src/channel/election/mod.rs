//! Election channel: setup -> open -> cast_vote* -> end -> result.
//!
//! # Locking
//!
//! - `phase` is an `RwLock`. A cast_vote holds it in read mode for its
//!   whole admission, so votes on different questions run in parallel.
//!   open and end take it in write mode: ending waits for in-flight votes,
//!   blocks new ones, and the result is computed from a settled tally.
//! - Each [`Question`] guards its vote map with its own `RwLock`.
//! - The attendee set is a `Mutex` and the organizer key an `RwLock`, both
//!   shared with the owning LAO so that later changes to the LAO apply to
//!   its existing elections.
//!
//! A cast_vote is validated in full (question ids, ballot shapes) before
//! any vote of it is applied, so a rejected message changes nothing.

pub mod question;
pub mod result;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use parking_lot::{Mutex, RwLock};

use crate::channel::{Admission, Channel, ChannelCore};
use crate::crypto::{self, ServerKeys};
use crate::error::HubError;
use crate::message::Message;
use crate::messagedata::{CastVote, ElectionData, ElectionEnd, ElectionOpen, ElectionResult, ElectionSetup};
use crate::schema::SchemaValidator;

pub use question::{Question, VoteRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Started,
    Terminated,
}

/// Public keys (base64url) of the attendees allowed to vote.
#[derive(Debug, Default)]
pub struct Attendees {
    store: Mutex<HashSet<String>>,
}

impl Attendees {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            store: Mutex::new(keys.into_iter().collect()),
        }
    }

    pub fn is_present(&self, key: &str) -> bool {
        self.store.lock().contains(key)
    }

    pub fn add(&self, key: impl Into<String>) {
        self.store.lock().insert(key.into());
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }
}

pub struct ElectionChannel {
    core: ChannelCore,

    lao_id: String,
    election_id: String,
    name: String,

    /// Unix timestamps bounding the election.
    start: i64,
    end: i64,

    phase: RwLock<Phase>,

    /// In setup order; fixed after construction.
    questions: Vec<Question>,
    question_index: HashMap<String, usize>,

    attendees: Arc<Attendees>,
    organizer: Arc<RwLock<VerifyingKey>>,
    server_keys: Arc<ServerKeys>,
}

impl fmt::Debug for ElectionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectionChannel")
            .field("path", &self.core.path())
            .field("election_id", &self.election_id)
            .field("phase", &self.phase())
            .field("questions", &self.questions.len())
            .finish_non_exhaustive()
    }
}

impl ElectionChannel {
    pub fn new(
        path: impl Into<String>,
        setup: &ElectionSetup,
        attendees: Arc<Attendees>,
        organizer: Arc<RwLock<VerifyingKey>>,
        server_keys: Arc<ServerKeys>,
        schema: Arc<dyn SchemaValidator>,
    ) -> Self {
        let questions: Vec<Question> = setup.questions.iter().map(Question::new).collect();
        let question_index = questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id().to_string(), i))
            .collect();

        Self {
            core: ChannelCore::new(path, schema),
            lao_id: setup.lao.clone(),
            election_id: setup.id.clone(),
            name: setup.name.clone(),
            start: setup.start_time,
            end: setup.end_time,
            phase: RwLock::new(Phase::Created),
            questions,
            question_index,
            attendees,
            organizer,
            server_keys,
        }
    }

    pub fn lao_id(&self) -> &str {
        &self.lao_id
    }

    pub fn election_id(&self) -> &str {
        &self.election_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    pub fn started(&self) -> bool {
        self.phase() == Phase::Started
    }

    pub fn terminated(&self) -> bool {
        self.phase() == Phase::Terminated
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.question_index.get(id).map(|&i| &self.questions[i])
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn attendees(&self) -> &Arc<Attendees> {
        &self.attendees
    }

    fn is_organizer(&self, sender: &VerifyingKey) -> bool {
        *self.organizer.read() == *sender
    }

    fn check_ids(&self, lao: &str, election: &str) -> Result<(), HubError> {
        if lao != self.lao_id {
            return Err(HubError::InvalidRequest(format!(
                "lao id is {lao}, should be {}",
                self.lao_id
            )));
        }
        if election != self.election_id {
            return Err(HubError::InvalidRequest(format!(
                "election id is {election}, should be {}",
                self.election_id
            )));
        }
        Ok(())
    }

    fn process_election_open(
        &self,
        msg: Message,
        admission: Admission<'_>,
        open: ElectionOpen,
    ) -> Result<(), HubError> {
        tracing::info!(channel = %self.path(), "Received an election#open message");

        if !self.is_organizer(&admission.sender) {
            return Err(HubError::Unauthorized(format!(
                "sender is {}, should be the organizer",
                msg.sender
            )));
        }
        self.check_ids(&open.lao, &open.election)?;
        if open.opened_at < self.start || open.opened_at > self.end {
            return Err(HubError::InvalidRequest(format!(
                "election cannot be opened at {}, outside [{}, {}]",
                open.opened_at, self.start, self.end
            )));
        }

        let mut phase = self.phase.write();
        if *phase != Phase::Created {
            return Err(HubError::InvalidRequest(
                "election is already started or terminated".into(),
            ));
        }
        self.core.commit(admission.reservation, msg)?;
        *phase = Phase::Started;
        Ok(())
    }

    fn process_cast_vote(
        &self,
        msg: Message,
        admission: Admission<'_>,
        cast_vote: CastVote,
    ) -> Result<(), HubError> {
        tracing::info!(channel = %self.path(), "Received an election#cast_vote message");

        if !(self.attendees.is_present(&msg.sender) || self.is_organizer(&admission.sender)) {
            return Err(HubError::Unauthorized(
                "only attendees can cast a vote in an election".into(),
            ));
        }
        self.check_ids(&cast_vote.lao, &cast_vote.election)?;

        let phase = self.phase.read();
        match *phase {
            Phase::Started => {}
            Phase::Created => {
                return Err(HubError::InvalidRequest("election is not open yet".into()));
            }
            Phase::Terminated => {
                return Err(HubError::InvalidRequest("election is terminated".into()));
            }
        }

        let mut ballots = Vec::with_capacity(cast_vote.votes.len());
        for vote in &cast_vote.votes {
            let question = self
                .question(&vote.question)
                .ok_or_else(|| HubError::UnknownQuestion(vote.question.clone()))?;
            let indexes = question.check_ballot(&vote.vote)?;
            ballots.push((question, vote, indexes));
        }

        for (question, vote, indexes) in ballots {
            let record = VoteRecord {
                source_message_id: msg.message_id.clone(),
                vote_id: vote.id.clone(),
                vote_timestamp: cast_vote.created_at,
                chosen_option_indexes: indexes,
            };
            if !question.update_vote(&msg.sender, record) {
                tracing::debug!(
                    channel = %self.path(),
                    question = %question.id(),
                    "Keeping earlier vote, incoming vote dropped"
                );
            }
        }

        self.core.commit(admission.reservation, msg)
    }

    fn process_election_end(
        &self,
        msg: Message,
        admission: Admission<'_>,
        end: ElectionEnd,
    ) -> Result<(), HubError> {
        tracing::info!(channel = %self.path(), "Received an election#end message");

        if !self.is_organizer(&admission.sender) {
            return Err(HubError::Unauthorized(format!(
                "sender is {}, should be the organizer",
                msg.sender
            )));
        }
        self.check_ids(&end.lao, &end.election)?;
        if end.created_at < self.start {
            return Err(HubError::InvalidRequest(format!(
                "election end created at {} is before the start time {}",
                end.created_at, self.start
            )));
        }
        if crypto::decode(&end.registered_votes).is_err() {
            return Err(HubError::InvalidRequest(
                "registered_votes should be base64url encoded".into(),
            ));
        }

        let mut phase = self.phase.write();
        match *phase {
            Phase::Started => {}
            Phase::Created => {
                return Err(HubError::InvalidRequest("election is not started".into()));
            }
            Phase::Terminated => {
                return Err(HubError::InvalidRequest("election is already terminated".into()));
            }
        }
        self.core.commit(admission.reservation, msg)?;
        *phase = Phase::Terminated;

        // Still under the write lock: no vote can land after the snapshot.
        self.broadcast_election_result()
    }

    fn process_election_result(
        &self,
        msg: Message,
        admission: Admission<'_>,
        result: ElectionResult,
    ) -> Result<(), HubError> {
        tracing::info!(channel = %self.path(), "Received an election#result message");

        if admission.sender != self.server_keys.public_key() {
            return Err(HubError::Unauthorized(
                "election results are only published by the server".into(),
            ));
        }
        for (i, q) in result.questions.iter().enumerate() {
            if crypto::decode(&q.id).is_err() {
                return Err(HubError::InvalidRequest(format!(
                    "question id {i} {}, should be base64URL encoded",
                    q.id
                )));
            }
        }

        self.core.commit(admission.reservation, msg)
    }

    /// Compute, sign, store and broadcast the election result.
    fn broadcast_election_result(&self) -> Result<(), HubError> {
        tracing::info!(channel = %self.path(), "Gathering results for the election");

        let result = result::gather_results(&self.questions);
        let msg = result::sign_result(&result, &self.server_keys)?;
        let admission = self.core.verify_message(&msg)?;
        self.process_election_result(msg, admission, result)
    }
}

impl Channel for ElectionChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn handle_message(&self, msg: Message, admission: Admission<'_>) -> Result<(), HubError> {
        let data = ElectionData::decode(&admission.data)?;
        match data {
            ElectionData::Open(open) => self.process_election_open(msg, admission, open),
            ElectionData::CastVote(cast_vote) => self.process_cast_vote(msg, admission, cast_vote),
            ElectionData::End(end) => self.process_election_end(msg, admission, end),
            ElectionData::Result(result) => self.process_election_result(msg, admission, result),
            ElectionData::Setup(_) => Err(HubError::InvalidRequest(
                "election is already set up".into(),
            )),
        }
    }
}
