//! Election questions and their concurrently mutated vote tallies.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::error::HubError;
use crate::messagedata::{BallotCount, ElectionSetupQuestion, VotingMethod};

/// The live vote of one voter on one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRecord {
    /// Id of the cast_vote message that carried this vote.
    pub source_message_id: String,
    pub vote_id: String,
    pub vote_timestamp: i64,
    pub chosen_option_indexes: Vec<usize>,
}

#[derive(Debug)]
pub struct Question {
    id: String,
    ballot_options: Vec<String>,
    method: VotingMethod,
    /// voter public key (base64url) -> vote
    valid_votes: RwLock<HashMap<String, VoteRecord>>,
}

impl Question {
    pub fn new(setup: &ElectionSetupQuestion) -> Self {
        Self {
            id: setup.id.clone(),
            ballot_options: setup.ballot_options.clone(),
            method: setup.voting_method,
            valid_votes: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> VotingMethod {
        self.method
    }

    pub fn ballot_options(&self) -> &[String] {
        &self.ballot_options
    }

    /// Check a ballot against this question and return its indexes.
    pub fn check_ballot(&self, indexes: &[i64]) -> Result<Vec<usize>, HubError> {
        match self.method {
            VotingMethod::Plurality if indexes.is_empty() => {
                return Err(HubError::InvalidBallot(
                    "no ballot option was chosen for plurality voting method".into(),
                ));
            }
            VotingMethod::Approval if indexes.len() != 1 => {
                return Err(HubError::InvalidBallot(
                    "approval voting method requires exactly one ballot option".into(),
                ));
            }
            _ => {}
        }

        let mut chosen = Vec::with_capacity(indexes.len());
        let mut seen = HashSet::with_capacity(indexes.len());
        for &i in indexes {
            let index = usize::try_from(i)
                .ok()
                .filter(|&i| i < self.ballot_options.len())
                .ok_or_else(|| {
                    HubError::InvalidBallot(format!(
                        "ballot option index {i} out of range for question {}",
                        self.id
                    ))
                })?;
            if !seen.insert(index) {
                return Err(HubError::InvalidBallot(format!(
                    "ballot option index {i} chosen twice for question {}",
                    self.id
                )));
            }
            chosen.push(index);
        }
        Ok(chosen)
    }

    /// Apply the replacement policy for `voter`.
    ///
    /// The incoming record is kept when the voter has none yet or the
    /// stored one has a strictly greater timestamp. Returns whether the
    /// tally changed.
    pub fn update_vote(&self, voter: &str, record: VoteRecord) -> bool {
        let mut valid_votes = self.valid_votes.write();
        match valid_votes.get(voter) {
            Some(earlier) if earlier.vote_timestamp <= record.vote_timestamp => false,
            _ => {
                valid_votes.insert(voter.to_string(), record);
                true
            }
        }
    }

    pub fn vote_of(&self, voter: &str) -> Option<VoteRecord> {
        self.valid_votes.read().get(voter).cloned()
    }

    pub fn vote_count(&self) -> usize {
        self.valid_votes.read().len()
    }

    /// Per-option counts aligned with the ballot option order.
    ///
    /// A ballot choosing several options counts once for each of them.
    pub fn tally(&self) -> Vec<BallotCount> {
        let mut counts = vec![0usize; self.ballot_options.len()];
        for record in self.valid_votes.read().values() {
            for &index in &record.chosen_option_indexes {
                if let Some(count) = counts.get_mut(index) {
                    *count += 1;
                }
            }
        }
        self.ballot_options
            .iter()
            .zip(counts)
            .map(|(option, count)| BallotCount {
                ballot_option: option.clone(),
                count,
            })
            .collect()
    }
}
