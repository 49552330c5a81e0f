use crate::DeliveryError;
use crate::message::Message;
use crate::panic_guard::catch_panic;

use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

/// Error returned by a message handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives messages on behalf of a subscriber.
///
/// Remote buses invoke one subscriber's handler one message at a time. The
/// in-process bus runs it on the publishing task, so concurrent publishers may
/// overlap, and a handler may itself publish or unsubscribe.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one message.
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self.0)(message)
    }
}

/// A handler together with its registration identity.
///
/// Clones share the identity, so a clone can be used to unsubscribe.
#[derive(Clone)]
pub struct Subscriber {
    id: Uuid,
    handler: Arc<dyn MessageHandler>,
}

impl Subscriber {
    /// Wraps `handler` under a fresh identity.
    pub fn new<H>(handler: H) -> Self
    where
        H: MessageHandler,
    {
        Self::from_arc(Arc::new(handler))
    }

    /// Wraps an already shared handler under a fresh identity.
    #[must_use]
    pub fn from_arc(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handler,
        }
    }

    /// Wraps a synchronous closure.
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self::new(FnHandler(handler))
    }

    /// The registration identity.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Hands `message` to the handler, catching both errors and panics so
    /// that one failing subscriber cannot disturb delivery to others.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or a description of its panic.
    pub async fn deliver(&self, message: Message) -> Result<(), DeliveryError> {
        match catch_panic(self.handler.handle(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::Handler(e)),
            Err(panic) => Err(DeliveryError::Panicked(panic)),
        }
    }
}

impl Debug for Subscriber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscriber {}

impl Hash for Subscriber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageType;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_deliver_ok() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let subscriber = Subscriber::from_fn(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        subscriber
            .deliver(Message::new(MessageType::ExtractNlp))
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deliver_isolates_errors() {
        let subscriber = Subscriber::from_fn(|_| Err("boom".into()));

        let result = subscriber.deliver(Message::new(MessageType::ExtractNlp)).await;

        assert_matches!(result, Err(DeliveryError::Handler(e)) if e.to_string() == "boom");
    }

    #[tokio::test]
    async fn test_deliver_isolates_panics() {
        let subscriber = Subscriber::from_fn(|_| panic!("handler exploded"));

        let result = subscriber.deliver(Message::new(MessageType::ExtractNlp)).await;

        assert_matches!(result, Err(DeliveryError::Panicked(m)) if m == "handler exploded");
    }

    #[test]
    fn test_clones_share_identity() {
        let subscriber = Subscriber::from_fn(|_| Ok(()));
        let other = Subscriber::from_fn(|_| Ok(()));

        assert_eq!(subscriber.clone(), subscriber);
        assert_ne!(subscriber, other);
    }
}
