//! Message value type.

use std::collections::HashMap;

use bytes::Bytes;

/// A message: opaque body bytes plus optional application properties.
///
/// The client never interprets the body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    body: Bytes,
    application_properties: HashMap<String, String>,
}

impl Message {
    /// Create a message with the given body and no properties.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            application_properties: HashMap::new(),
        }
    }

    /// Add an application property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    /// Replace the application properties.
    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.application_properties = properties;
        self
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[inline]
    pub fn application_properties(&self) -> &HashMap<String, String> {
        &self.application_properties
    }

    /// Look up one application property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.application_properties.get(key).map(String::as_str)
    }

    /// Take the body, dropping the properties.
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

impl From<Bytes> for Message {
    fn from(body: Bytes) -> Self {
        Self::new(body)
    }
}

impl From<&'static str> for Message {
    fn from(body: &'static str) -> Self {
        Self::new(body)
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Self::new(body)
    }
}

impl From<String> for Message {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}
