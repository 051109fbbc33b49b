//! Reasoner collaborator.
//!
//! A reasoner decides which concepts an individual belongs to given the
//! asserted facts. Stores consult it when answering `classes_of` and
//! `members_of`; the broker never calls it directly.

use std::collections::BTreeSet;

use crate::iri::Iri;

/// Read access to asserted facts, provided by the store to its reasoner.
pub trait FactView {
    /// Explicit class assertions of `individual`.
    fn asserted_classes(&self, individual: &Iri) -> BTreeSet<Iri>;

    /// Direct super-concepts of `concept`.
    fn direct_super_classes(&self, concept: &Iri) -> BTreeSet<Iri>;

    /// Properties used with `individual` as subject.
    fn outgoing_properties(&self, individual: &Iri) -> BTreeSet<Iri>;

    /// Object properties used with `individual` as object.
    fn incoming_properties(&self, individual: &Iri) -> BTreeSet<Iri>;

    fn domain_of(&self, property: &Iri) -> Option<Iri>;

    fn range_concept_of(&self, property: &Iri) -> Option<Iri>;
}

/// Inference engine contract.
pub trait Reasoner: Send + Sync {
    /// Returns every concept `individual` is a member of.
    fn classify(&self, individual: &Iri, facts: &dyn FactView) -> BTreeSet<Iri>;
}

/// Adds the transitive super-concepts of every concept in `classes`.
pub fn close_over_super_classes(classes: &mut BTreeSet<Iri>, facts: &dyn FactView) {
    let mut pending: Vec<Iri> = classes.iter().cloned().collect();
    while let Some(concept) = pending.pop() {
        for sup in facts.direct_super_classes(&concept) {
            if classes.insert(sup.clone()) {
                pending.push(sup);
            }
        }
    }
}

/// Reports explicit class assertions only; no inference at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertedOnly;

impl Reasoner for AssertedOnly {
    fn classify(&self, individual: &Iri, facts: &dyn FactView) -> BTreeSet<Iri> {
        facts.asserted_classes(individual)
    }
}

/// Subsumption plus domain/range inference.
///
/// An individual belongs to its asserted concepts, to the domain of every
/// property it is the subject of, to the range concept of every object
/// property it is the object of, and to all super-concepts of those.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralReasoner;

impl Reasoner for StructuralReasoner {
    fn classify(&self, individual: &Iri, facts: &dyn FactView) -> BTreeSet<Iri> {
        let mut classes = facts.asserted_classes(individual);
        for property in facts.outgoing_properties(individual) {
            if let Some(domain) = facts.domain_of(&property) {
                classes.insert(domain);
            }
        }
        for property in facts.incoming_properties(individual) {
            if let Some(range) = facts.range_concept_of(&property) {
                classes.insert(range);
            }
        }
        close_over_super_classes(&mut classes, facts);
        classes
    }
}
