//! Error types for the property-access layer.
//!
//! Errors come in two tiers:
//! - [`IntegrationError`]: recoverable modeling inconsistencies a behavior can
//!   anticipate and react to. Each variant names the offending property,
//!   entity and (when known) the behavior that triggered it.
//! - [`BrokerError::Internal`]: programming defects. These are logged and
//!   returned; the caller is expected to abort the run.

use std::fmt;

use thiserror::Error;

use crate::iri::Iri;
use crate::literal::{ScalarTag, Term};
use crate::store::PropertyKind;

/// Optional name of the behavior that issued the failing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin(pub Option<String>);

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(name) => write!(f, " (behavior '{name}')"),
            None => Ok(()),
        }
    }
}

/// Cardinality expected by the failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedCardinality {
    Functional,
    NonFunctional,
}

impl fmt::Display for ExpectedCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Functional => f.write_str("functional"),
            Self::NonFunctional => f.write_str("non-functional"),
        }
    }
}

/// Recoverable integration inconsistencies.
#[derive(Debug, Clone, Error)]
pub enum IntegrationError {
    #[error("Operation '{operation}' requires a {expected} property, but '{property}' is not{origin}")]
    WrongCardinality {
        property: Iri,
        operation: &'static str,
        expected: ExpectedCardinality,
        origin: Origin,
    },

    #[error("Property '{property}' of '{individual}' has no value{origin}")]
    UninitializedValue {
        property: Iri,
        individual: Iri,
        origin: Origin,
    },

    #[error("Expected '{individual}' to carry property '{property}', but it has none{origin}")]
    MissingProperty {
        property: Iri,
        individual: Iri,
        origin: Origin,
    },

    #[error("Expected '{individual}' not to carry property '{property}', but it already does{origin}")]
    AlreadyHasProperty {
        property: Iri,
        individual: Iri,
        origin: Origin,
    },

    #[error("Property '{property}' of '{individual}' is read-only; '{operation}' rejected{origin}")]
    ReadOnlyViolation {
        property: Iri,
        individual: Iri,
        operation: &'static str,
        origin: Origin,
    },

    #[error("Functional property '{property}' of '{individual}' has {count} values in the store")]
    BrokenUniquenessAssumption {
        property: Iri,
        individual: Iri,
        count: usize,
    },

    #[error("No such individual: {individual}")]
    NoSuchIndividual { individual: Iri },

    #[error("Value {value} does not fit the declared range {expected} of '{property}'{origin}")]
    RangeMismatch {
        property: Iri,
        value: Term,
        expected: String,
        origin: Origin,
    },

    #[error("Cannot parse {text:?} as {tag} for property '{property}'{origin}")]
    UnparsableLiteral {
        property: Iri,
        text: String,
        tag: ScalarTag,
        origin: Origin,
    },

    #[error("No such property: {property}")]
    NoSuchProperty { property: Iri },

    #[error("Property '{property}' is not a {expected} property")]
    KindMismatch { property: Iri, expected: PropertyKind },

    #[error("No such concept: {concept}")]
    NoSuchConcept { concept: Iri },

    #[error("Concept '{concept}' has no query named '{query}'")]
    NoSuchQuery { concept: Iri, query: String },

    #[error("'{individual}' is already classified as '{concept}'")]
    AlreadyClassified { individual: Iri, concept: Iri },

    #[error("'{individual}' is not a member of '{concept}'")]
    NotAMember { individual: Iri, concept: Iri },

    #[error("Cannot delete '{individual}': no such entity")]
    NoSuchEntity { individual: Iri },

    #[error("Tolerance comparator given for non-floating property '{property}' ({tag})")]
    InvalidToleranceConfiguration { property: Iri, tag: ScalarTag },
}

/// Errors reported by the store collaborator.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Individual unknown to the store.
    #[error("Individual not found: {0}")]
    IndividualNotFound(Iri),

    /// Individual already exists.
    #[error("Duplicate individual: {0}")]
    DuplicateIndividual(Iri),

    /// Property has not been declared in the schema.
    #[error("Undeclared property: {0}")]
    UndeclaredProperty(Iri),

    /// Literal does not match the explicit tag supplied with an assertion.
    #[error("Literal {literal} is not a valid {tag}")]
    LiteralTagMismatch { literal: String, tag: ScalarTag },

    /// Retraction of an assertion that does not exist.
    #[error("No such assertion: {0}")]
    NoSuchAssertion(String),

    /// Backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Top-level error type.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Integration inconsistency: {0}")]
    Integration(#[from] IntegrationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BrokerError {
    /// Creates an internal error and logs it with full context.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(target: "modelstate::error", %message, "internal error");
        Self::Internal { message }
    }

    /// Returns true if a calling behavior may handle this error and continue.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Integration(_))
    }

    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns the integration inconsistency, if this is one.
    #[must_use]
    pub const fn as_integration(&self) -> Option<&IntegrationError> {
        match self {
            Self::Integration(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
