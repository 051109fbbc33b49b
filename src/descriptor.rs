//! Property descriptors.
//!
//! A [`PropertyDescriptor`] describes one property of the schema as seen by
//! one caller: its cardinality, its value kind and whether the caller may
//! mutate it. Descriptors are the entry point for obtaining [`Value`]s bound
//! to individuals.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broker::{Expectation, ModelStateBroker};
use crate::error::{BrokerResult, ExpectedCardinality, IntegrationError, Origin};
use crate::instance::Instance;
use crate::iri::Iri;
use crate::literal::{ScalarTag, Term, Tolerance};
use crate::store::{KnowledgeStore, PropertyKind, Range};
use crate::value::Value;

/// Why a descriptor was requested.
///
/// The access token is fixed at construction: a descriptor requested for a
/// read-only query never becomes writable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Access {
    pub mode: AccessMode,
    /// Name of the requesting behavior, reported in errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Requested by a behavior that mutates the model.
    #[default]
    Mutating,
    /// Requested by a read-only query.
    ReadOnly,
}

impl Access {
    #[must_use]
    pub const fn mutating() -> Self {
        Self {
            mode: AccessMode::Mutating,
            behavior: None,
        }
    }

    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            mode: AccessMode::ReadOnly,
            behavior: None,
        }
    }

    /// Attributes the access to a named behavior.
    #[must_use]
    pub fn by(mut self, behavior: impl Into<String>) -> Self {
        self.behavior = Some(behavior.into());
        self
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(self.mode, AccessMode::ReadOnly)
    }
}

/// Single-valued or multi-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Functional,
    NonFunctional,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Functional => f.write_str("functional"),
            Self::NonFunctional => f.write_str("non-functional"),
        }
    }
}

/// Value kind of a descriptor, with its kind-specific constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Data {
        tag: ScalarTag,
        tolerance: Option<Tolerance>,
    },
    Object {
        /// Concept that referenced individuals must belong to.
        range: Option<Iri>,
    },
}

impl ValueKind {
    #[must_use]
    pub const fn property_kind(&self) -> PropertyKind {
        match self {
            Self::Data { .. } => PropertyKind::Data,
            Self::Object { .. } => PropertyKind::Object,
        }
    }
}

/// Describes one property of the schema for one caller.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    property: Iri,
    cardinality: Cardinality,
    kind: ValueKind,
    read_only: bool,
    behavior: Option<String>,
}

impl fmt::Display for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.read_only { "ro" } else { "rw" };
        write!(
            f,
            "{} [{} {} {mode}]",
            self.property,
            self.cardinality,
            self.kind.property_kind()
        )
    }
}

impl PropertyDescriptor {
    /// Start building a descriptor for `property`.
    #[must_use]
    pub fn builder(property: impl Into<Iri>) -> DescriptorBuilder {
        DescriptorBuilder::new(property.into())
    }

    #[must_use]
    pub const fn property(&self) -> &Iri {
        &self.property
    }

    #[must_use]
    pub const fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    #[must_use]
    pub const fn kind(&self) -> &ValueKind {
        &self.kind
    }

    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub const fn is_functional(&self) -> bool {
        matches!(self.cardinality, Cardinality::Functional)
    }

    #[must_use]
    pub const fn is_non_functional(&self) -> bool {
        matches!(self.cardinality, Cardinality::NonFunctional)
    }

    #[must_use]
    pub const fn is_data_kind(&self) -> bool {
        matches!(self.kind, ValueKind::Data { .. })
    }

    #[must_use]
    pub const fn is_object_kind(&self) -> bool {
        matches!(self.kind, ValueKind::Object { .. })
    }

    /// Scalar tag of a data property.
    #[must_use]
    pub const fn scalar_tag(&self) -> Option<ScalarTag> {
        match &self.kind {
            ValueKind::Data { tag, .. } => Some(*tag),
            ValueKind::Object { .. } => None,
        }
    }

    /// Tolerance comparator of a floating data property.
    #[must_use]
    pub const fn tolerance(&self) -> Option<&Tolerance> {
        match &self.kind {
            ValueKind::Data { tolerance, .. } => tolerance.as_ref(),
            ValueKind::Object { .. } => None,
        }
    }

    /// Referenced-concept constraint of an object property.
    #[must_use]
    pub const fn range_concept(&self) -> Option<&Iri> {
        match &self.kind {
            ValueKind::Object { range } => range.as_ref(),
            ValueKind::Data { .. } => None,
        }
    }

    pub(crate) fn origin(&self) -> Origin {
        Origin(self.behavior.clone())
    }

    /// Returns true if `other` describes the same schema property with the
    /// same cardinality and kind, regardless of access.
    #[must_use]
    pub fn same_property(&self, other: &Self) -> bool {
        self.property == other.property
            && self.cardinality == other.cardinality
            && self.kind.property_kind() == other.kind.property_kind()
    }

    /// The value of this property for `individual`, loaded from the store if
    /// not yet materialized in the current generation.
    pub fn value_for(self: &Arc<Self>, broker: &ModelStateBroker, individual: &Instance) -> BrokerResult<Value> {
        broker.materialize(self, individual, Expectation::Any)
    }

    /// Like [`value_for`](Self::value_for), but fails with `MissingProperty`
    /// if the individual carries no value.
    pub fn existing_value_for(self: &Arc<Self>, broker: &ModelStateBroker, individual: &Instance) -> BrokerResult<Value> {
        broker.materialize(self, individual, Expectation::Existing)
    }

    /// Like [`value_for`](Self::value_for), but fails with
    /// `AlreadyHasProperty` if the individual already carries a value.
    pub fn new_value_for(self: &Arc<Self>, broker: &ModelStateBroker, individual: &Instance) -> BrokerResult<Value> {
        broker.materialize(self, individual, Expectation::New)
    }

    /// Returns true if `individual` currently carries a value, taking
    /// uncommitted changes of this generation into account.
    pub fn has_value_for(&self, broker: &ModelStateBroker, individual: &Instance) -> BrokerResult<bool> {
        broker.has_value(self, individual)
    }

    /// Orders two individuals by their value of this property.
    ///
    /// Individuals without a value sort first. Only defined for functional
    /// properties.
    pub fn compare(self: &Arc<Self>, broker: &ModelStateBroker, a: &Instance, b: &Instance) -> BrokerResult<Ordering> {
        if !self.is_functional() {
            return Err(IntegrationError::WrongCardinality {
                property: self.property.clone(),
                operation: "compare",
                expected: ExpectedCardinality::Functional,
                origin: self.origin(),
            }
            .into());
        }
        let left = self.value_for(broker, a)?.try_get()?;
        let right = self.value_for(broker, b)?.try_get()?;
        Ok(self.compare_terms(left.as_ref(), right.as_ref()))
    }

    pub(crate) fn compare_terms(&self, a: Option<&Term>, b: Option<&Term>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.compare_value(b, self.tolerance()),
        }
    }
}

/// Builder for [`PropertyDescriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    property: Iri,
    cardinality: Cardinality,
    kind: PropertyKind,
    tag: Option<ScalarTag>,
    tolerance: Option<Tolerance>,
    range: Option<Iri>,
    access: Access,
    strict_tolerance: bool,
}

impl DescriptorBuilder {
    fn new(property: Iri) -> Self {
        Self {
            property,
            cardinality: Cardinality::Functional,
            kind: PropertyKind::Data,
            tag: None,
            tolerance: None,
            range: None,
            access: Access::mutating(),
            strict_tolerance: false,
        }
    }

    #[must_use]
    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    #[must_use]
    pub fn functional(self) -> Self {
        self.cardinality(Cardinality::Functional)
    }

    #[must_use]
    pub fn non_functional(self) -> Self {
        self.cardinality(Cardinality::NonFunctional)
    }

    /// Data property; `None` resolves the tag from the schema.
    #[must_use]
    pub fn data(mut self, tag: Option<ScalarTag>) -> Self {
        self.kind = PropertyKind::Data;
        self.tag = tag;
        self
    }

    /// Object property referencing members of `range`, if given.
    #[must_use]
    pub fn object(mut self, range: Option<Iri>) -> Self {
        self.kind = PropertyKind::Object;
        self.range = range;
        self
    }

    #[must_use]
    pub fn tolerance(mut self, tolerance: Option<Tolerance>) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Reject a tolerance on a non-floating property instead of discarding it.
    #[must_use]
    pub fn strict_tolerance(mut self, strict: bool) -> Self {
        self.strict_tolerance = strict;
        self
    }

    /// Builds the descriptor.
    ///
    /// A data property without an explicit tag costs exactly one range
    /// lookup; if the schema declares none the tag defaults to `Any`.
    pub fn build(self, store: &dyn KnowledgeStore) -> BrokerResult<PropertyDescriptor> {
        let kind = match self.kind {
            PropertyKind::Data => {
                let tag = match self.tag {
                    Some(tag) => tag,
                    None => match store.declared_range_of(&self.property)? {
                        Some(Range::Scalar(tag)) => tag,
                        _ => ScalarTag::Any,
                    },
                };
                let tolerance = match self.tolerance {
                    Some(_) if !tag.is_floating() => {
                        if self.strict_tolerance {
                            return Err(IntegrationError::InvalidToleranceConfiguration {
                                property: self.property,
                                tag,
                            }
                            .into());
                        }
                        tracing::warn!(
                            target: "modelstate::descriptor",
                            property = %self.property,
                            %tag,
                            "discarding tolerance comparator on non-floating property"
                        );
                        None
                    }
                    other => other,
                };
                ValueKind::Data { tag, tolerance }
            }
            PropertyKind::Object => ValueKind::Object { range: self.range },
        };

        Ok(PropertyDescriptor {
            property: self.property,
            cardinality: self.cardinality,
            kind,
            read_only: self.access.is_read_only(),
            behavior: self.access.behavior,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, PropertyDeclaration};

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .declare_property(PropertyDeclaration::data("weight", true, Some(ScalarTag::Double)))
            .unwrap();
        store
            .declare_property(PropertyDeclaration::data("age", true, Some(ScalarTag::Integer)))
            .unwrap();
        store
            .declare_property(PropertyDeclaration::data("note", false, None))
            .unwrap();
        store
    }

    #[test]
    fn test_tag_resolved_from_schema() {
        let store = store();
        let d = PropertyDescriptor::builder("age").data(None).build(&store).unwrap();
        assert_eq!(d.scalar_tag(), Some(ScalarTag::Integer));
    }

    #[test]
    fn test_tag_defaults_to_any() {
        let store = store();
        let d = PropertyDescriptor::builder("note")
            .non_functional()
            .data(None)
            .build(&store)
            .unwrap();
        assert_eq!(d.scalar_tag(), Some(ScalarTag::Any));
        assert!(d.is_non_functional());
    }

    #[test]
    fn test_explicit_tag_wins() {
        let store = store();
        let d = PropertyDescriptor::builder("age")
            .data(Some(ScalarTag::String))
            .build(&store)
            .unwrap();
        assert_eq!(d.scalar_tag(), Some(ScalarTag::String));
    }

    #[test]
    fn test_tolerance_kept_on_floating_property() {
        let store = store();
        let d = PropertyDescriptor::builder("weight")
            .data(None)
            .tolerance(Some(Tolerance::absolute(0.1)))
            .build(&store)
            .unwrap();
        assert!(d.tolerance().is_some());
    }

    #[test]
    fn test_tolerance_discarded_on_integer_property() {
        let store = store();
        let d = PropertyDescriptor::builder("age")
            .data(None)
            .tolerance(Some(Tolerance::absolute(0.1)))
            .build(&store)
            .unwrap();
        assert!(d.tolerance().is_none());
    }

    #[test]
    fn test_tolerance_rejected_in_strict_mode() {
        let store = store();
        let err = PropertyDescriptor::builder("age")
            .data(None)
            .tolerance(Some(Tolerance::absolute(0.1)))
            .strict_tolerance(true)
            .build(&store)
            .unwrap_err();
        assert!(matches!(
            err.as_integration(),
            Some(IntegrationError::InvalidToleranceConfiguration { .. })
        ));
    }

    #[test]
    fn test_read_only_derived_from_access() {
        let store = store();
        let ro = PropertyDescriptor::builder("age")
            .access(Access::read_only().by("census"))
            .build(&store)
            .unwrap();
        assert!(ro.read_only());
        assert_eq!(ro.origin(), Origin(Some("census".into())));

        let rw = PropertyDescriptor::builder("age").build(&store).unwrap();
        assert!(!rw.read_only());
        assert!(ro.same_property(&rw));
    }

    #[test]
    fn test_kind_predicates() {
        let store = store();
        let obj = PropertyDescriptor::builder("owner")
            .object(Some(Iri::new("Person")))
            .build(&store)
            .unwrap();
        assert!(obj.is_object_kind() && !obj.is_data_kind());
        assert_eq!(obj.range_concept(), Some(&Iri::new("Person")));
        assert_eq!(obj.scalar_tag(), None);
        assert_eq!(obj.to_string(), "owner [functional object rw]");
    }

    #[test]
    fn test_compare_terms_absent_first() {
        let store = store();
        let d = PropertyDescriptor::builder("age").build(&store).unwrap();
        let zero = Term::from(0);
        let one = Term::from(1);
        assert_eq!(d.compare_terms(None, Some(&zero)), Ordering::Less);
        assert_eq!(d.compare_terms(Some(&zero), Some(&one)), Ordering::Less);
        assert_eq!(d.compare_terms(None, None), Ordering::Equal);
    }
}
