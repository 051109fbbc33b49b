//! Global identifiers.
//!
//! Every addressable thing in the knowledge base (entities, properties and
//! concepts) is named by an [`Iri`]. Identity is purely textual: two IRIs are
//! the same resource iff their strings are equal.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Globally unique, stable resource identifier.
///
/// Cheap to clone; the string is shared.
///
/// # Examples
///
/// ```
/// use modelstate::Iri;
///
/// let iri = Iri::new("urn:modelstate:person_1");
/// assert_eq!(iri.local_name(), "person_1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Iri(Arc<str>);

impl Iri {
    /// Creates an IRI from any string-like value.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// Returns the IRI as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the fragment after the last `#`, `/` or `:`.
    #[must_use]
    pub fn local_name(&self) -> &str {
        self.0
            .rfind(['#', '/', ':'])
            .map_or(&self.0, |idx| &self.0[idx + 1..])
    }

    /// Returns true if the IRI is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Iri {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Iri {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&Iri> for Iri {
    fn from(value: &Iri) -> Self {
        value.clone()
    }
}

impl AsRef<str> for Iri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iri_equality_is_textual() {
        assert_eq!(Iri::new("urn:a"), Iri::from("urn:a".to_string()));
        assert_ne!(Iri::new("urn:a"), Iri::new("urn:b"));
    }

    #[test]
    fn test_iri_local_name() {
        assert_eq!(Iri::new("http://x.org/onto#Person").local_name(), "Person");
        assert_eq!(Iri::new("http://x.org/onto/age").local_name(), "age");
        assert_eq!(Iri::new("urn:ms:e1").local_name(), "e1");
        assert_eq!(Iri::new("plain").local_name(), "plain");
    }

    #[test]
    fn test_iri_serialization_is_transparent() {
        let iri = Iri::new("urn:x");
        let json = serde_json::to_string(&iri).unwrap();
        assert_eq!(json, "\"urn:x\"");
        let back: Iri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, iri);
    }
}
