//! The channel dispatch contract.
//!
//! Every channel type composes a [`ChannelCore`] (socket set, inbox,
//! schema validator) and implements [`Channel::handle_message`]. The
//! remaining operations (subscribe, unsubscribe, publish, broadcast,
//! catchup) are provided by the trait and behave identically for all
//! channel types.

pub mod election;

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;

use crate::error::HubError;
use crate::inbox::{Inbox, Reservation};
use crate::message::Message;
use crate::rpc::{Broadcast, Catchup, Publish, Query, Subscribe, Unsubscribe};
use crate::schema::SchemaValidator;
use crate::sockets::{Socket, Sockets};

/// A message that passed the authenticity pipeline and holds its id.
pub struct Admission<'a> {
    /// Decoded payload bytes.
    pub data: Vec<u8>,
    /// Verified sender key.
    pub sender: VerifyingKey,
    pub reservation: Reservation<'a>,
}

/// Decode, schema-check and authenticate an envelope.
///
/// Runs every stateless check of the pipeline; no channel state is read.
pub fn verify_envelope(
    msg: &Message,
    schema: &dyn SchemaValidator,
) -> Result<(Vec<u8>, VerifyingKey), HubError> {
    let data = msg.decode_data()?;
    schema.verify_data(&data)?;
    let sender = msg.verify(&data)?;
    Ok((data, sender))
}

/// State shared by every channel type.
pub struct ChannelCore {
    path: String,
    sockets: Sockets,
    inbox: Inbox,
    schema: Arc<dyn SchemaValidator>,
}

impl ChannelCore {
    pub fn new(path: impl Into<String>, schema: Arc<dyn SchemaValidator>) -> Self {
        let path = path.into();
        Self {
            sockets: Sockets::new(),
            inbox: Inbox::new(path.clone()),
            path,
            schema,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sockets(&self) -> &Sockets {
        &self.sockets
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Full pipeline for an inbound envelope, ending with the id reservation.
    pub fn verify_message(&self, msg: &Message) -> Result<Admission<'_>, HubError> {
        let (data, sender) = verify_envelope(msg, self.schema.as_ref())?;
        let reservation = self.inbox.reserve(&msg.message_id)?;
        Ok(Admission {
            data,
            sender,
            reservation,
        })
    }

    /// Store the message and broadcast it to every subscriber.
    pub fn commit(&self, reservation: Reservation<'_>, msg: Message) -> Result<(), HubError> {
        let line = self.broadcast_line(&msg)?;
        reservation.commit(msg, |stored| {
            tracing::info!(channel = %self.path, message_id = %stored.message_id, "Broadcasting message to all clients");
            self.sockets.send_to_all(&line);
        })
    }

    fn broadcast_line(&self, msg: &Message) -> Result<String, HubError> {
        let notification = Query::Broadcast(Broadcast::notification(&self.path, msg.clone()));
        serde_json::to_string(&notification)
            .map_err(|e| HubError::Internal(format!("failed to marshal broadcast query: {e}")))
    }
}

pub trait Channel: Send + Sync {
    fn core(&self) -> &ChannelCore;

    /// Type-specific processing of an admitted message.
    ///
    /// Implementations validate the payload, mutate their state and must
    /// finish by committing the reservation through [`ChannelCore::commit`].
    /// Returning an error before committing leaves no trace.
    fn handle_message(&self, msg: Message, admission: Admission<'_>) -> Result<(), HubError>;

    fn path(&self) -> &str {
        self.core().path()
    }

    fn subscribe(&self, socket: Socket, msg: &Subscribe) -> Result<(), HubError> {
        tracing::info!(channel = %self.path(), msg_id = msg.id, "Received a subscribe");
        self.core().sockets().upsert(socket);
        Ok(())
    }

    fn unsubscribe(&self, socket_id: &str, msg: &Unsubscribe) -> Result<(), HubError> {
        tracing::info!(channel = %self.path(), msg_id = msg.id, "Received an unsubscribe");
        if !self.core().sockets().delete(socket_id) {
            return Err(HubError::NotSubscribed);
        }
        Ok(())
    }

    fn publish(&self, publish: &Publish) -> Result<(), HubError> {
        tracing::info!(channel = %self.path(), msg_id = publish.id, "Received a publish");
        self.process(publish.params.message.clone())
    }

    fn broadcast(&self, broadcast: &Broadcast) -> Result<(), HubError> {
        tracing::info!(channel = %self.path(), msg_id = ?broadcast.id, "Received a broadcast");
        self.process(broadcast.params.message.clone())
    }

    fn catchup(&self, catchup: &Catchup) -> Vec<Message> {
        tracing::info!(channel = %self.path(), msg_id = catchup.id, "Received a catchup");
        self.core().inbox().get_sorted_messages()
    }

    /// Drop a socket without the unsubscribe bookkeeping (connection closed).
    fn remove_socket(&self, socket_id: &str) -> bool {
        self.core().sockets().delete(socket_id)
    }

    /// Pipeline then dispatch, shared by publish and broadcast.
    fn process(&self, msg: Message) -> Result<(), HubError> {
        let admission = self.core().verify_message(&msg)?;
        self.handle_message(msg, admission)
    }
}
