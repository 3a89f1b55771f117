//! Typed message payloads and the `(object, action)` registry.
//!
//! Every payload carries its `object` and `action` tags. [`ElectionData`]
//! is the closed set of payloads an election channel understands; it is
//! decoded once and dispatched by a `match` in the channel.

use serde::{Deserialize, Serialize};

use crate::error::HubError;

pub const OBJECT_ELECTION: &str = "election";

pub const ACTION_SETUP: &str = "setup";
pub const ACTION_OPEN: &str = "open";
pub const ACTION_CAST_VOTE: &str = "cast_vote";
pub const ACTION_END: &str = "end";
pub const ACTION_RESULT: &str = "result";

#[derive(Deserialize)]
struct Header {
    object: String,
    action: String,
}

/// Read the `(object, action)` tags of a JSON payload.
pub fn object_and_action(data: &[u8]) -> Result<(String, String), HubError> {
    let header: Header = serde_json::from_slice(data)
        .map_err(|e| HubError::DecodeError(format!("failed to read object/action: {e}")))?;
    Ok((header.object, header.action))
}

/// How a question's ballots are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotingMethod {
    /// One or more options per ballot.
    Plurality,
    /// Exactly one option per ballot.
    Approval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionSetup {
    pub object: String,
    pub action: String,
    pub version: String,
    pub id: String,
    pub lao: String,
    pub name: String,
    pub created_at: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub questions: Vec<ElectionSetupQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionSetupQuestion {
    pub id: String,
    pub question: String,
    pub voting_method: VotingMethod,
    pub ballot_options: Vec<String>,
    #[serde(default)]
    pub write_in: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionOpen {
    pub object: String,
    pub action: String,
    pub lao: String,
    pub election: String,
    pub opened_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CastVote {
    pub object: String,
    pub action: String,
    pub lao: String,
    pub election: String,
    pub created_at: i64,
    pub votes: Vec<Vote>,
}

/// One ballot inside a cast_vote message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Vote {
    pub id: String,
    pub question: String,
    /// Chosen ballot option indexes. Range is checked against the question.
    pub vote: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionEnd {
    pub object: String,
    pub action: String,
    pub lao: String,
    pub election: String,
    pub created_at: i64,
    pub registered_votes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionResult {
    pub object: String,
    pub action: String,
    pub questions: Vec<ElectionResultQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionResultQuestion {
    pub id: String,
    pub result: Vec<BallotCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BallotCount {
    pub ballot_option: String,
    pub count: usize,
}

/// Payloads handled by the election channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionData {
    Setup(ElectionSetup),
    Open(ElectionOpen),
    CastVote(CastVote),
    End(ElectionEnd),
    Result(ElectionResult),
}

impl ElectionData {
    /// Whether `(object, action)` names an election payload.
    pub fn is_known(object: &str, action: &str) -> bool {
        object == OBJECT_ELECTION
            && matches!(
                action,
                ACTION_SETUP | ACTION_OPEN | ACTION_CAST_VOTE | ACTION_END | ACTION_RESULT
            )
    }

    /// Decode a payload by its tags. Shape errors are schema violations.
    pub fn decode(data: &[u8]) -> Result<Self, HubError> {
        let (object, action) = object_and_action(data)?;
        if object != OBJECT_ELECTION {
            return Err(HubError::InvalidRequest(format!(
                "no handler for {object}#{action} on an election channel"
            )));
        }
        let decoded = match action.as_str() {
            ACTION_SETUP => serde_json::from_slice(data).map(ElectionData::Setup),
            ACTION_OPEN => serde_json::from_slice(data).map(ElectionData::Open),
            ACTION_CAST_VOTE => serde_json::from_slice(data).map(ElectionData::CastVote),
            ACTION_END => serde_json::from_slice(data).map(ElectionData::End),
            ACTION_RESULT => serde_json::from_slice(data).map(ElectionData::Result),
            other => {
                return Err(HubError::InvalidRequest(format!(
                    "no handler for {object}#{other} on an election channel"
                )));
            }
        };
        decoded.map_err(|e| HubError::SchemaViolation(format!("{object}#{action}: {e}")))
    }
}
