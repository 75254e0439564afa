use serde::{Deserialize, Serialize};

/// Body token a participant sends to signal it is ready for the test to start.
pub const READY_TOKEN: &str = "go!";

/// Separates alternating keys and values in a test-run-config body.
pub const KEY_VALUE_DELIMITER: char = '\u{0}';

/// Joins multiple values of one key.
pub const VALUE_LIST_DELIMITER: char = '\n';

/// Variable marking the kind of message.
pub const MESSAGE_TYPE_VARIABLE: &str = "message-type";

/// `message-type` value of test configuration messages.
pub const TEST_RUN_CONFIG_TYPE: &str = "test-run-config";

/// A message on the bus.
///
/// Variables keep insertion order; setting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    sender_id: String,
    body: String,
    variables: Vec<(String, String)>,
}

impl Message {
    /// Create a message from `sender_id`.
    pub fn new(sender_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            body: body.into(),
            variables: Vec::new(),
        }
    }

    /// A ready signal from `sender_id`.
    pub fn ready(sender_id: impl Into<String>) -> Self {
        Self::new(sender_id, READY_TOKEN)
    }

    /// Set a variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.variables.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.variables.push((key, value)),
        }
        self
    }

    /// Sender identifier
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Message body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// All variables, in insertion order
    pub fn variables(&self) -> &[(String, String)] {
        &self.variables
    }

    /// Look up a variable
    pub fn variable(&self, key: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the body is the ready token, ignoring case.
    #[must_use]
    pub fn is_ready_signal(&self) -> bool {
        self.body.eq_ignore_ascii_case(READY_TOKEN)
    }

    /// Batched key/value test configuration message.
    pub fn test_run_config<I, K, V>(sender_id: impl Into<String>, pairs: I, tags: &str) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let delimiter = KEY_VALUE_DELIMITER.to_string();
        let body = pairs
            .into_iter()
            .flat_map(|(k, v)| [k.into(), v.into()])
            .collect::<Vec<_>>()
            .join(&delimiter);

        Self::new(sender_id, body)
            .with_variable(MESSAGE_TYPE_VARIABLE, TEST_RUN_CONFIG_TYPE)
            .with_variable("output", "keys")
            .with_variable("tags", tags)
            .with_variable("excludes", "")
            .with_variable("includes", "")
    }

    /// Whether this is a test configuration message.
    #[must_use]
    pub fn is_test_run_config(&self) -> bool {
        self.variable(MESSAGE_TYPE_VARIABLE) == Some(TEST_RUN_CONFIG_TYPE)
    }

    /// Decode a batched key/value body.
    ///
    /// Keys keep first-occurrence order; values of a repeated key are joined
    /// by newline. A trailing key without a value maps to an empty string.
    pub fn key_values(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if self.body.is_empty() {
            return pairs;
        }

        let mut tokens = self.body.split(KEY_VALUE_DELIMITER);
        while let Some(key) = tokens.next() {
            let value = tokens.next().unwrap_or_default();
            match pairs.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => {
                    existing.1.push(VALUE_LIST_DELIMITER);
                    existing.1.push_str(value);
                }
                None => pairs.push((key.to_string(), value.to_string())),
            }
        }
        pairs
    }
}
