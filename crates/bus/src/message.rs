use crate::ParseError;
use crate::clock::{Clock, SystemClock};

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Wire key holding the message type.
pub const TYPE_KEY: &str = "TYPE";

/// Wire key holding the creation date.
pub const DATE_KEY: &str = "DATE";

string_enum! {
    /// Closed set of control and work message kinds.
    MessageType, crate::ParseError::UnknownType {
        /// Poison pill: terminates every receive loop that observes it.
        Shutdown => "SHUTDOWN",
        /// Announces a (partial) number of documents to expect.
        InitMonitoring => "INIT_MONITORING",
        /// Requests NLP extraction for one document.
        ExtractNlp => "EXTRACT_NLP",
    }
}

string_enum! {
    /// Content keys a message may carry.
    Field, crate::ParseError::UnknownField {
        /// Document id.
        DocId => "DOC_ID",
        /// Root document id.
        RootId => "R_ID",
        /// Index the document lives in.
        IndexName => "INDEX_NAME",
        /// Free value, e.g. the expected total for INIT_MONITORING.
        Value => "VALUE",
    }
}

/// Typed envelope exchanged on the bus.
///
/// Type and date are fixed at construction; content only grows through [`Message::add`].
/// The date is truncated to millisecond precision so that it survives the JSON form unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    message_type: MessageType,
    date: DateTime<Utc>,
    content: BTreeMap<Field, String>,
}

impl Message {
    /// Creates an empty message stamped with the wall clock.
    #[must_use]
    pub fn new(message_type: MessageType) -> Self {
        Self::with_clock(message_type, &SystemClock)
    }

    /// Creates an empty message stamped by `clock`.
    #[must_use]
    pub fn with_clock(message_type: MessageType, clock: &dyn Clock) -> Self {
        Self {
            message_type,
            date: truncate_to_millis(clock.now()),
            content: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) a content entry.
    #[must_use]
    pub fn add(mut self, field: Field, value: impl Into<String>) -> Self {
        self.content.insert(field, value.into());
        self
    }

    /// The message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The creation date.
    #[must_use]
    pub const fn date(&self) -> DateTime<Utc> {
        self.date
    }

    /// The value stored under `field`, if any.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<&str> {
        self.content.get(&field).map(String::as_str)
    }

    /// All content entries.
    #[must_use]
    pub const fn content(&self) -> &BTreeMap<Field, String> {
        &self.content
    }

    /// Whether this is a poison pill.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.message_type == MessageType::Shutdown
    }

    /// Flat JSON object merging `TYPE` and `DATE` with the content entries.
    #[must_use]
    pub fn to_json(&self) -> String {
        let mut object = Map::new();
        object.insert(TYPE_KEY.to_string(), Value::from(self.message_type.as_str()));
        object.insert(
            DATE_KEY.to_string(),
            Value::from(self.date.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        for (field, value) in &self.content {
            object.insert(field.as_str().to_string(), Value::from(value.as_str()));
        }

        Value::Object(object).to_string()
    }

    /// Rebuilds a message from its JSON form.
    ///
    /// # Errors
    ///
    /// Fails if the payload is not a flat object of strings, or if `TYPE`,
    /// `DATE` or a content key cannot be recognized.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        let map: HashMap<String, String> = serde_json::from_str(json)?;

        Self::try_from(map)
    }
}

impl TryFrom<HashMap<String, String>> for Message {
    type Error = ParseError;

    fn try_from(mut map: HashMap<String, String>) -> Result<Self, Self::Error> {
        let message_type = map
            .remove(TYPE_KEY)
            .ok_or(ParseError::MissingType)?
            .parse::<MessageType>()?;

        let raw_date = map.remove(DATE_KEY).ok_or(ParseError::MissingDate)?;
        let date = DateTime::parse_from_rfc3339(&raw_date)
            .map_err(|e| ParseError::InvalidDate(raw_date.clone(), e))?
            .with_timezone(&Utc);

        let content = map
            .into_iter()
            .map(|(key, value)| Ok((key.parse::<Field>()?, value)))
            .collect::<Result<BTreeMap<_, _>, ParseError>>()?;

        Ok(Self {
            message_type,
            date,
            content,
        })
    }
}

impl TryFrom<Bytes> for Message {
    type Error = ParseError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let map: HashMap<String, String> = serde_json::from_slice(&bytes)?;

        Self::try_from(map)
    }
}

impl From<Message> for Bytes {
    fn from(message: Message) -> Self {
        Self::from(message.to_json())
    }
}

/// Poison pill with empty content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownMessage;

impl ShutdownMessage {
    /// Builds the SHUTDOWN message stamped by `clock`.
    #[must_use]
    pub fn with_clock(self, clock: &dyn Clock) -> Message {
        Message::with_clock(MessageType::Shutdown, clock)
    }
}

impl From<ShutdownMessage> for Message {
    fn from(_: ShutdownMessage) -> Self {
        Self::new(MessageType::Shutdown)
    }
}

fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn clock() -> MockClock {
        MockClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap()
                + chrono::TimeDelta::microseconds(123_456),
        )
    }

    #[test]
    fn test_date_is_truncated_to_millis() {
        let message = Message::with_clock(MessageType::ExtractNlp, &clock());

        assert_eq!(message.date().timestamp_subsec_micros(), 123_000);
    }

    #[test]
    fn test_to_json_shape() {
        let message = Message::with_clock(MessageType::ExtractNlp, &clock())
            .add(Field::DocId, "doc")
            .add(Field::IndexName, "local-datashare");

        let value: Value = serde_json::from_str(&message.to_json()).unwrap();

        assert_eq!(value["TYPE"], "EXTRACT_NLP");
        assert_eq!(value["DATE"], "2024-03-01T12:30:45.123Z");
        assert_eq!(value["DOC_ID"], "doc");
        assert_eq!(value["INDEX_NAME"], "local-datashare");
        assert_eq!(value.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_json_round_trip() {
        let message = Message::with_clock(MessageType::InitMonitoring, &clock())
            .add(Field::Value, "12")
            .add(Field::RootId, "root");

        assert_eq!(Message::from_json(&message.to_json()).unwrap(), message);
    }

    #[test]
    fn test_bytes_round_trip_of_shutdown() {
        let message = ShutdownMessage.with_clock(&clock());

        let bytes: Bytes = message.clone().into();
        let decoded = Message::try_from(bytes).unwrap();

        assert!(decoded.is_shutdown());
        assert!(decoded.content().is_empty());
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_add_replaces_existing_value() {
        let message = Message::new(MessageType::ExtractNlp)
            .add(Field::DocId, "first")
            .add(Field::DocId, "second");

        assert_eq!(message.get(Field::DocId), Some("second"));
        assert_eq!(message.content().len(), 1);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = r#"{"TYPE":"NOPE","DATE":"2024-03-01T12:30:45.123Z"}"#;

        assert_matches!(Message::from_json(json), Err(ParseError::UnknownType(t)) if t == "NOPE");
    }

    #[test]
    fn test_invalid_date_is_rejected() {
        let json = r#"{"TYPE":"SHUTDOWN","DATE":"yesterday"}"#;

        assert_matches!(Message::from_json(json), Err(ParseError::InvalidDate(raw, _)) if raw == "yesterday");
    }

    #[test]
    fn test_missing_entries_are_rejected() {
        assert_matches!(
            Message::from_json(r#"{"DATE":"2024-03-01T12:30:45.123Z"}"#),
            Err(ParseError::MissingType)
        );
        assert_matches!(
            Message::from_json(r#"{"TYPE":"SHUTDOWN"}"#),
            Err(ParseError::MissingDate)
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let json = r#"{"TYPE":"SHUTDOWN","DATE":"2024-03-01T12:30:45.123Z","COLOR":"red"}"#;

        assert_matches!(Message::from_json(json), Err(ParseError::UnknownField(f)) if f == "COLOR");
    }

    #[test]
    fn test_non_string_values_are_rejected() {
        let json = r#"{"TYPE":"SHUTDOWN","DATE":"2024-03-01T12:30:45.123Z","VALUE":3}"#;

        assert_matches!(Message::from_json(json), Err(ParseError::Json(_)));
    }

    #[test]
    fn test_reconstruction_from_map() {
        let map = HashMap::from([
            ("TYPE".to_string(), "EXTRACT_NLP".to_string()),
            ("DATE".to_string(), "2024-03-01T12:30:45.123+02:00".to_string()),
            ("DOC_ID".to_string(), "id".to_string()),
        ]);

        let message = Message::try_from(map).unwrap();

        assert_eq!(message.message_type(), MessageType::ExtractNlp);
        assert_eq!(
            message.date().to_rfc3339_opts(SecondsFormat::Millis, true),
            "2024-03-01T10:30:45.123Z"
        );
        assert_eq!(message.get(Field::DocId), Some("id"));
    }
}
