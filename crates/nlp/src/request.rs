use crate::Error;

use async_trait::async_trait;
use dossier_bus::{Field, Message, MessageType};

/// Error returned by an [`NlpProcessor`].
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// One document to run extraction on, decoded from an EXTRACT_NLP message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractRequest {
    /// Document id.
    pub doc_id: String,

    /// Root document id, used for routing.
    pub root_id: String,

    /// Index holding the document.
    pub index_name: String,
}

impl TryFrom<&Message> for ExtractRequest {
    type Error = Error;

    fn try_from(message: &Message) -> Result<Self, Self::Error> {
        if message.message_type() != MessageType::ExtractNlp {
            return Err(Error::NotAnExtraction(message.message_type().to_string()));
        }

        let field = |field: Field| {
            message
                .get(field)
                .map(ToString::to_string)
                .ok_or(Error::MissingField(field))
        };

        Ok(Self {
            doc_id: field(Field::DocId)?,
            root_id: field(Field::RootId)?,
            index_name: field(Field::IndexName)?,
        })
    }
}

impl From<ExtractRequest> for Message {
    fn from(request: ExtractRequest) -> Self {
        Self::new(MessageType::ExtractNlp)
            .add(Field::DocId, request.doc_id)
            .add(Field::RootId, request.root_id)
            .add(Field::IndexName, request.index_name)
    }
}

/// Runs extraction for one document. Implemented by NLP library adapters.
#[async_trait]
pub trait NlpProcessor
where
    Self: Send + Sync + 'static,
{
    /// Processes `request`.
    async fn process(&self, request: ExtractRequest) -> Result<(), ProcessorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_decode_request() {
        let message = Message::new(MessageType::ExtractNlp)
            .add(Field::DocId, "doc")
            .add(Field::RootId, "root")
            .add(Field::IndexName, "local-datashare");

        let request = ExtractRequest::try_from(&message).unwrap();

        assert_eq!(request.doc_id, "doc");
        assert_eq!(Message::from(request).content(), message.content());
    }

    #[test]
    fn test_missing_field() {
        let message = Message::new(MessageType::ExtractNlp).add(Field::DocId, "doc");

        assert_matches!(
            ExtractRequest::try_from(&message),
            Err(Error::MissingField(Field::RootId))
        );
    }

    #[test]
    fn test_wrong_type() {
        let message = Message::new(MessageType::InitMonitoring);

        assert_matches!(
            ExtractRequest::try_from(&message),
            Err(Error::NotAnExtraction(t)) if t == "INIT_MONITORING"
        );
    }
}
