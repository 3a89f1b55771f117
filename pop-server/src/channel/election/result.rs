//! Election result gathering and server-signed publication.

use crate::crypto::ServerKeys;
use crate::error::HubError;
use crate::message::Message;
use crate::messagedata::{
    ACTION_RESULT, ElectionResult, ElectionResultQuestion, OBJECT_ELECTION, VotingMethod,
};

use super::question::Question;

/// Build the result payload from the current tallies.
///
/// Only plurality questions are reported; approval questions are left
/// out of the result.
pub fn gather_results(questions: &[Question]) -> ElectionResult {
    let mut result = ElectionResult {
        object: OBJECT_ELECTION.to_string(),
        action: ACTION_RESULT.to_string(),
        questions: Vec::new(),
    };

    for question in questions {
        if question.method() != VotingMethod::Plurality {
            tracing::debug!(question = %question.id(), "Skipping non-plurality question in result");
            continue;
        }
        result.questions.push(ElectionResultQuestion {
            id: question.id().to_string(),
            result: question.tally(),
        });
        tracing::info!(question = %question.id(), "Appending a question with the count and result");
    }

    result
}

/// Serialize and sign `result` into a fresh envelope from the server.
pub fn sign_result(result: &ElectionResult, keys: &ServerKeys) -> Result<Message, HubError> {
    let payload = serde_json::to_vec(result)
        .map_err(|e| HubError::Internal(format!("failed to marshal the result: {e}")))?;
    Ok(Message::sign(&payload, keys.signing_key()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::election::question::VoteRecord;
    use crate::crypto;
    use crate::messagedata::{BallotCount, ElectionSetupQuestion};

    fn question(id: &str, method: VotingMethod) -> Question {
        Question::new(&ElectionSetupQuestion {
            id: id.into(),
            question: "?".into(),
            voting_method: method,
            ballot_options: vec!["red".into(), "blue".into()],
            write_in: false,
        })
    }

    #[test]
    fn approval_questions_are_omitted() {
        let qs = vec![
            question("p", VotingMethod::Plurality),
            question("a", VotingMethod::Approval),
        ];
        let result = gather_results(&qs);
        assert_eq!(result.questions.len(), 1);
        assert_eq!(result.questions[0].id, "p");
    }

    #[test]
    fn result_follows_setup_order() {
        let qs = vec![
            question("z", VotingMethod::Plurality),
            question("a", VotingMethod::Plurality),
        ];
        qs[1].update_vote(
            "v",
            VoteRecord {
                source_message_id: "m".into(),
                vote_id: "v".into(),
                vote_timestamp: 1,
                chosen_option_indexes: vec![1],
            },
        );
        let result = gather_results(&qs);
        let ids: Vec<_> = result.questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);
        assert_eq!(
            result.questions[1].result,
            vec![
                BallotCount { ballot_option: "red".into(), count: 0 },
                BallotCount { ballot_option: "blue".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn signed_result_verifies_against_server_key() {
        let keys = ServerKeys::generate();
        let msg = sign_result(&gather_results(&[]), &keys).unwrap();
        assert_eq!(msg.sender, keys.public_key_b64());
        assert_eq!(msg.message_id, crypto::hash(&[&msg.data, &msg.signature]));
        let data = msg.decode_data().unwrap();
        assert_eq!(msg.verify(&data).unwrap(), keys.public_key());
        assert!(msg.witness_signatures.is_empty());
    }
}
