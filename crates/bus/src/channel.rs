string_enum! {
    /// A logical topic. Subscribers only see messages published on channels they registered for.
    Channel, crate::ParseError::UnknownChannel {
        /// Document NLP extraction requests and monitoring.
        Nlp => "NLP",
        /// Application events.
        Event => "EVENT",
        /// Reserved for tests.
        Test => "TEST",
    }
}
