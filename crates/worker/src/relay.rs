use async_trait::async_trait;
use dossier_bus::Message;
use dossier_nlp::{ExtractRequest, NlpProcessor, ProcessorError};
use dossier_queue::BlockingQueue;
use tracing::debug;

/// Hands every extracted document to the queue of the next stage.
#[derive(Debug)]
pub struct RelayProcessor<Q> {
    queue_name: String,
    queue: Q,
}

impl<Q> RelayProcessor<Q>
where
    Q: BlockingQueue<Message>,
{
    pub const fn new(queue_name: String, queue: Q) -> Self {
        Self { queue_name, queue }
    }
}

#[async_trait]
impl<Q> NlpProcessor for RelayProcessor<Q>
where
    Q: BlockingQueue<Message>,
{
    async fn process(&self, request: ExtractRequest) -> Result<(), ProcessorError> {
        let doc_id = request.doc_id.clone();

        if !self.queue.offer(Message::from(request)).await {
            return Err(format!("queue {} rejected document {doc_id}", self.queue_name).into());
        }
        debug!(queue = %self.queue_name, doc_id, "document relayed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dossier_bus::{Field, MessageType};
    use dossier_queue_memory::MemoryQueue;

    fn request(doc_id: &str) -> ExtractRequest {
        ExtractRequest {
            doc_id: doc_id.to_string(),
            root_id: "root".to_string(),
            index_name: "local-datashare".to_string(),
        }
    }

    #[tokio::test]
    async fn test_relays_request_as_extraction() {
        let queue = MemoryQueue::unbounded();
        let relay = RelayProcessor::new("extract:queue:nlp".to_string(), queue.clone());

        relay.process(request("doc")).await.unwrap();

        let message = queue.try_pop().unwrap();
        assert_eq!(message.message_type(), MessageType::ExtractNlp);
        assert_eq!(message.get(Field::DocId), Some("doc"));
        assert_eq!(message.get(Field::IndexName), Some("local-datashare"));
    }

    #[tokio::test]
    async fn test_full_queue_is_an_error() {
        let queue = MemoryQueue::bounded(1);
        let relay = RelayProcessor::new("extract:queue:nlp".to_string(), queue);

        relay.process(request("first")).await.unwrap();
        assert!(relay.process(request("second")).await.is_err());
    }
}
