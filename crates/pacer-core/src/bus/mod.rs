//! Message bus - synchronous pub/sub between participants and the session
//!
//! Used for ready signals and for test configuration propagation. Delivery is
//! synchronous and in registration order. Unlike broadcaster rounds, a failing
//! receiver stops delivery to the remaining receivers and the error is
//! returned to the sender.

mod message;


pub use message::{
    Message, KEY_VALUE_DELIMITER, MESSAGE_TYPE_VARIABLE, READY_TOKEN, TEST_RUN_CONFIG_TYPE,
    VALUE_LIST_DELIMITER,
};

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Delivery failure
#[derive(Debug, Error)]
pub enum MessageBusError {
    /// A receiver rejected the message; later receivers were skipped
    #[error("receiver #{index} failed on message from '{sender}': {source}")]
    ReceiverFailed {
        /// Registration index of the failing receiver
        index: usize,
        /// Sender of the message
        sender: String,
        /// What the receiver reported
        #[source]
        source: anyhow::Error,
    },
}

/// Something that consumes bus messages.
pub trait MessageReceiver: Send + Sync {
    /// Handle one message.
    fn receive(&self, message: &Message) -> anyhow::Result<()>;
}

impl<F> MessageReceiver for F
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync,
{
    fn receive(&self, message: &Message) -> anyhow::Result<()> {
        self(message)
    }
}

/// Shared handle to the bus. Clones deliver to the same receivers.
#[derive(Clone, Default)]
pub struct MessageBus {
    receivers: Arc<RwLock<Vec<Arc<dyn MessageReceiver>>>>,
}

impl MessageBus {
    /// Create a bus without receivers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to every receiver, in registration order.
    ///
    /// The sender itself receives the message if it is registered. The
    /// receiver list is snapshotted first, so receivers added during delivery
    /// only see later messages.
    pub fn send(&self, message: &Message) -> Result<(), MessageBusError> {
        let receivers = self
            .receivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (index, receiver) in receivers.iter().enumerate() {
            receiver
                .receive(message)
                .map_err(|source| MessageBusError::ReceiverFailed {
                    index,
                    sender: message.sender_id().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Append a receiver. Receivers cannot be removed.
    pub fn add_receiver(&self, receiver: impl MessageReceiver + 'static) {
        self.add_shared_receiver(Arc::new(receiver));
    }

    /// Append an already shared receiver.
    pub fn add_shared_receiver(&self, receiver: Arc<dyn MessageReceiver>) {
        self.receivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(receiver);
    }

    /// Number of registered receivers
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.receivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}
