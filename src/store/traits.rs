//! Store collaborator contract.
//!
//! The broker never manipulates the knowledge base directly; everything goes
//! through [`KnowledgeStore`]. Implementations own persistence and delegate
//! inference to a reasoner; inferred memberships surface only through
//! [`KnowledgeStore::members_of`] and [`KnowledgeStore::classes_of`].

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::iri::Iri;
use crate::literal::{Literal, ScalarTag, Term};

/// Value kind of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Relates an individual to a literal.
    Data,
    /// Relates an individual to another individual.
    Object,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str("data"),
            Self::Object => f.write_str("object"),
        }
    }
}

/// Declared range of a property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Range {
    Scalar(ScalarTag),
    Concept(Iri),
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(tag) => write!(f, "{tag}"),
            Self::Concept(c) => write!(f, "{c}"),
        }
    }
}

/// Schema declaration of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDeclaration {
    pub property: Iri,
    pub kind: PropertyKind,
    pub functional: bool,
    pub domain: Option<Iri>,
    pub range: Option<Range>,
}

impl PropertyDeclaration {
    /// Declares a data property with an optional scalar range.
    #[must_use]
    pub fn data(property: impl Into<Iri>, functional: bool, range: Option<ScalarTag>) -> Self {
        Self {
            property: property.into(),
            kind: PropertyKind::Data,
            functional,
            domain: None,
            range: range.map(Range::Scalar),
        }
    }

    /// Declares an object property with an optional concept range.
    #[must_use]
    pub fn object(property: impl Into<Iri>, functional: bool, range: Option<Iri>) -> Self {
        Self {
            property: property.into(),
            kind: PropertyKind::Object,
            functional,
            domain: None,
            range: range.map(Range::Concept),
        }
    }

    /// Sets the domain concept.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<Iri>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Returns the concept range of an object property.
    #[must_use]
    pub fn range_concept(&self) -> Option<&Iri> {
        match &self.range {
            Some(Range::Concept(c)) => Some(c),
            _ => None,
        }
    }
}

/// One property assertion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub subject: Iri,
    pub property: Iri,
    pub object: Term,
}

/// A single low-level mutation, as produced by the commit pass and by
/// classification changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreChange {
    AssertData {
        subject: Iri,
        property: Iri,
        literal: Literal,
        tag: ScalarTag,
    },
    RetractData {
        subject: Iri,
        property: Iri,
        literal: Literal,
        tag: ScalarTag,
    },
    AssertObject {
        subject: Iri,
        property: Iri,
        object: Iri,
    },
    RetractObject {
        subject: Iri,
        property: Iri,
        object: Iri,
    },
    AssertClass {
        individual: Iri,
        concept: Iri,
    },
    RetractClass {
        individual: Iri,
        concept: Iri,
    },
}

impl StoreChange {
    /// Builds the assertion of `term` for `(subject, property)`.
    #[must_use]
    pub fn assert(subject: &Iri, property: &Iri, term: &Term, tag: ScalarTag) -> Self {
        match term {
            Term::Literal(literal) => Self::AssertData {
                subject: subject.clone(),
                property: property.clone(),
                literal: literal.clone(),
                tag,
            },
            Term::Individual(object) => Self::AssertObject {
                subject: subject.clone(),
                property: property.clone(),
                object: object.clone(),
            },
        }
    }

    /// Builds the retraction of `term` for `(subject, property)`.
    #[must_use]
    pub fn retract(subject: &Iri, property: &Iri, term: &Term, tag: ScalarTag) -> Self {
        match term {
            Term::Literal(literal) => Self::RetractData {
                subject: subject.clone(),
                property: property.clone(),
                literal: literal.clone(),
                tag,
            },
            Term::Individual(object) => Self::RetractObject {
                subject: subject.clone(),
                property: property.clone(),
                object: object.clone(),
            },
        }
    }

    /// Returns true for assertions, false for retractions.
    #[must_use]
    pub const fn is_assert(&self) -> bool {
        matches!(
            self,
            Self::AssertData { .. } | Self::AssertObject { .. } | Self::AssertClass { .. }
        )
    }

    #[must_use]
    pub const fn subject(&self) -> &Iri {
        match self {
            Self::AssertData { subject, .. }
            | Self::RetractData { subject, .. }
            | Self::AssertObject { subject, .. }
            | Self::RetractObject { subject, .. }
            | Self::AssertClass { individual: subject, .. }
            | Self::RetractClass { individual: subject, .. } => subject,
        }
    }
}

/// Storage contract consumed by the broker.
///
/// # Safety Considerations
/// - Implementations must serialize concurrent access themselves
/// - `apply` should be atomic where the backend allows it
pub trait KnowledgeStore: Send + Sync {
    /// Resolve an identifier to the canonical handle of an existing individual.
    fn resolve(&self, id: &Iri) -> Result<Option<Iri>, StoreError>;

    /// Create a new individual. Returns error if it already exists.
    fn create_individual(&self, id: &Iri) -> Result<(), StoreError>;

    /// Remove an individual and every assertion mentioning it.
    fn remove_individual(&self, id: &Iri) -> Result<(), StoreError>;

    /// Returns true if `concept` is declared in the schema.
    fn has_concept(&self, concept: &Iri) -> Result<bool, StoreError>;

    /// All individuals that are (asserted or inferred) members of `concept`.
    fn members_of(&self, concept: &Iri) -> Result<BTreeSet<Iri>, StoreError>;

    /// All concepts `individual` belongs to, including inferred ones.
    fn classes_of(&self, individual: &Iri) -> Result<BTreeSet<Iri>, StoreError>;

    /// Only the class assertions made explicitly for `individual`.
    fn asserted_classes_of(&self, individual: &Iri) -> Result<BTreeSet<Iri>, StoreError>;

    /// Transitive super-concepts of `concept`, excluding itself.
    fn super_classes_of(&self, concept: &Iri) -> Result<BTreeSet<Iri>, StoreError>;

    /// Transitive sub-concepts of `concept`, excluding itself.
    fn sub_classes_of(&self, concept: &Iri) -> Result<BTreeSet<Iri>, StoreError>;

    /// Assert that `individual` is a member of `concept`.
    fn assert_class(&self, individual: &Iri, concept: &Iri) -> Result<(), StoreError>;

    /// Retract an explicit class assertion.
    fn retract_class(&self, individual: &Iri, concept: &Iri) -> Result<(), StoreError>;

    fn data_values_of(&self, individual: &Iri, property: &Iri) -> Result<BTreeSet<Literal>, StoreError>;

    fn object_values_of(&self, individual: &Iri, property: &Iri) -> Result<BTreeSet<Iri>, StoreError>;

    /// Assert a data value. The explicit tag removes any literal-typing ambiguity.
    fn assert_data(&self, subject: &Iri, property: &Iri, literal: &Literal, tag: ScalarTag) -> Result<(), StoreError>;

    fn retract_data(&self, subject: &Iri, property: &Iri, literal: &Literal, tag: ScalarTag) -> Result<(), StoreError>;

    fn assert_object(&self, subject: &Iri, property: &Iri, object: &Iri) -> Result<(), StoreError>;

    fn retract_object(&self, subject: &Iri, property: &Iri, object: &Iri) -> Result<(), StoreError>;

    /// Every property assertion whose subject is `individual`.
    fn statements_with_subject(&self, individual: &Iri) -> Result<Vec<Statement>, StoreError>;

    /// Every object-property assertion whose object is `individual`.
    fn statements_with_object(&self, individual: &Iri) -> Result<Vec<Statement>, StoreError>;

    fn property_declaration(&self, property: &Iri) -> Result<Option<PropertyDeclaration>, StoreError>;

    /// Every declared property.
    fn property_declarations(&self) -> Result<Vec<PropertyDeclaration>, StoreError>;

    fn declared_range_of(&self, property: &Iri) -> Result<Option<Range>, StoreError> {
        Ok(self.property_declaration(property)?.and_then(|d| d.range))
    }

    fn declared_domain_of(&self, property: &Iri) -> Result<Option<Iri>, StoreError> {
        Ok(self.property_declaration(property)?.and_then(|d| d.domain))
    }

    /// Apply a batch of changes, returning the number applied.
    ///
    /// The default applies changes one at a time and is not atomic.
    fn apply(&self, changes: &[StoreChange]) -> Result<usize, StoreError> {
        for change in changes {
            match change {
                StoreChange::AssertData { subject, property, literal, tag } => {
                    self.assert_data(subject, property, literal, *tag)?;
                }
                StoreChange::RetractData { subject, property, literal, tag } => {
                    self.retract_data(subject, property, literal, *tag)?;
                }
                StoreChange::AssertObject { subject, property, object } => {
                    self.assert_object(subject, property, object)?;
                }
                StoreChange::RetractObject { subject, property, object } => {
                    self.retract_object(subject, property, object)?;
                }
                StoreChange::AssertClass { individual, concept } => {
                    self.assert_class(individual, concept)?;
                }
                StoreChange::RetractClass { individual, concept } => {
                    self.retract_class(individual, concept)?;
                }
            }
        }
        Ok(changes.len())
    }
}
