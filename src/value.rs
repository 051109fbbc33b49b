//! Materialized property values.
//!
//! A [`Value`] binds one [`PropertyDescriptor`] to one individual for the
//! duration of a generation. It remembers what the store held when it was
//! materialized (`original`) next to what the behavior holds now (`stored`),
//! and turns the difference into [`StoreChange`]s at commit time.
//!
//! Functional and non-functional bindings expose disjoint operation sets.
//! Calling an operation of the other set always fails with
//! [`IntegrationError::WrongCardinality`].

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::descriptor::{Cardinality, PropertyDescriptor, ValueKind};
use crate::error::{BrokerError, BrokerResult, ExpectedCardinality, IntegrationError};
use crate::instance::Instance;
use crate::iri::Iri;
use crate::literal::{Literal, ScalarTag, Term};
use crate::store::{KnowledgeStore, PropertyKind, StoreChange};

/// Observable state of a functional binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionalState {
    /// Neither loaded nor assigned.
    WriteOnly,
    /// Holds a value.
    Present,
    /// Explicitly cleared after a value existed.
    Unset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ValueData {
    Functional {
        original: Option<Term>,
        stored: Option<Term>,
    },
    NonFunctional {
        original: BTreeSet<Term>,
        stored: BTreeSet<Term>,
    },
}

impl ValueData {
    /// Caller guarantees `terms` has at most one element for functional data.
    fn loaded(cardinality: Cardinality, terms: BTreeSet<Term>) -> Self {
        match cardinality {
            Cardinality::Functional => {
                let original = terms.into_iter().next();
                Self::Functional {
                    stored: original.clone(),
                    original,
                }
            }
            Cardinality::NonFunctional => Self::NonFunctional {
                stored: terms.clone(),
                original: terms,
            },
        }
    }

    fn is_dirty(&self) -> bool {
        match self {
            Self::Functional { original, stored } => original != stored,
            Self::NonFunctional { original, stored } => original != stored,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Functional { stored, .. } => usize::from(stored.is_some()),
            Self::NonFunctional { stored, .. } => stored.len(),
        }
    }
}

#[derive(Debug)]
struct Binding {
    /// Set once any writable view has been handed out.
    writable: bool,
    data: ValueData,
}

/// Handle to a materialized binding.
///
/// Cloning a `Value` yields another handle to the same binding; use
/// [`Value::same_binding`] to test identity.
#[derive(Clone)]
pub struct Value {
    descriptor: Arc<PropertyDescriptor>,
    individual: Iri,
    binding: Arc<Mutex<Binding>>,
    store: Arc<dyn KnowledgeStore>,
    check_ranges: bool,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Value");
        out.field("property", self.descriptor.property())
            .field("individual", &self.individual)
            .field("read_only", &self.read_only());
        if let Ok(binding) = self.binding.lock() {
            out.field("data", &binding.data);
        }
        out.finish_non_exhaustive()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.descriptor.property(), self.individual)
    }
}

impl Value {
    pub(crate) fn load(
        descriptor: Arc<PropertyDescriptor>,
        individual: Iri,
        terms: BTreeSet<Term>,
        store: Arc<dyn KnowledgeStore>,
        check_ranges: bool,
    ) -> Self {
        let binding = Binding {
            writable: !descriptor.read_only(),
            data: ValueData::loaded(descriptor.cardinality(), terms),
        };
        Self {
            descriptor,
            individual,
            binding: Arc::new(Mutex::new(binding)),
            store,
            check_ranges,
        }
    }

    /// Another view of the same binding, seen through `descriptor`.
    pub(crate) fn view(&self, descriptor: Arc<PropertyDescriptor>) -> BrokerResult<Self> {
        if !descriptor.read_only() {
            self.lock()?.writable = true;
        }
        Ok(Self {
            descriptor,
            individual: self.individual.clone(),
            binding: Arc::clone(&self.binding),
            store: Arc::clone(&self.store),
            check_ranges: self.check_ranges,
        })
    }

    fn lock(&self) -> BrokerResult<MutexGuard<'_, Binding>> {
        self.binding
            .lock()
            .map_err(|_| BrokerError::internal(format!("poisoned binding for {self}")))
    }

    /// The descriptor this handle was obtained through.
    #[must_use]
    pub const fn var(&self) -> &Arc<PropertyDescriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn individual(&self) -> Instance {
        Instance::new(self.individual.clone())
    }

    #[must_use]
    pub const fn individual_iri(&self) -> &Iri {
        &self.individual
    }

    #[must_use]
    pub fn read_only(&self) -> bool {
        self.descriptor.read_only()
    }

    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.descriptor.cardinality()
    }

    /// Number of values currently held.
    pub fn n_elements(&self) -> BrokerResult<usize> {
        Ok(self.lock()?.data.len())
    }

    /// Returns true if the binding differs from what the store holds.
    pub fn is_dirty(&self) -> BrokerResult<bool> {
        Ok(self.lock()?.data.is_dirty())
    }

    /// Returns true if both handles refer to the same binding.
    #[must_use]
    pub fn same_binding(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.binding, &other.binding)
    }

    fn require(&self, expected: ExpectedCardinality, operation: &'static str) -> BrokerResult<()> {
        let ok = match expected {
            ExpectedCardinality::Functional => self.descriptor.is_functional(),
            ExpectedCardinality::NonFunctional => self.descriptor.is_non_functional(),
        };
        if ok {
            Ok(())
        } else {
            Err(IntegrationError::WrongCardinality {
                property: self.descriptor.property().clone(),
                operation,
                expected,
                origin: self.descriptor.origin(),
            }
            .into())
        }
    }

    fn require_writable(&self, operation: &'static str) -> BrokerResult<()> {
        if self.read_only() {
            return Err(self.read_only_violation(operation));
        }
        Ok(())
    }

    fn read_only_violation(&self, operation: &'static str) -> BrokerError {
        IntegrationError::ReadOnlyViolation {
            property: self.descriptor.property().clone(),
            individual: self.individual.clone(),
            operation,
            origin: self.descriptor.origin(),
        }
        .into()
    }

    fn range_mismatch(&self, value: Term, expected: String) -> BrokerError {
        IntegrationError::RangeMismatch {
            property: self.descriptor.property().clone(),
            value,
            expected,
            origin: self.descriptor.origin(),
        }
        .into()
    }

    /// Checks `term` against the descriptor and brings it to canonical form.
    fn admit(&self, term: Term) -> BrokerResult<Term> {
        match (self.descriptor.kind(), term) {
            (ValueKind::Data { tag, .. }, Term::Literal(literal)) => {
                if tag.admits(&literal) {
                    Ok(Term::Literal(literal.coerce(*tag)))
                } else {
                    Err(self.range_mismatch(Term::Literal(literal), tag.to_string()))
                }
            }
            (ValueKind::Data { tag, .. }, term @ Term::Individual(_)) => {
                Err(self.range_mismatch(term, tag.to_string()))
            }
            (ValueKind::Object { range }, Term::Individual(target)) => {
                let Some(target) = self.store.resolve(&target)? else {
                    return Err(IntegrationError::NoSuchIndividual { individual: target }.into());
                };
                if let (true, Some(range)) = (self.check_ranges, range) {
                    if !self.store.classes_of(&target)?.contains(range) {
                        return Err(self.range_mismatch(Term::Individual(target), range.to_string()));
                    }
                }
                Ok(Term::Individual(target))
            }
            (ValueKind::Object { range }, term @ Term::Literal(_)) => {
                let expected = range.as_ref().map_or_else(|| "individual".to_string(), Iri::to_string);
                Err(self.range_mismatch(term, expected))
            }
        }
    }

    /// Canonical form used for lookups; never fails.
    fn canonical(&self, term: Term) -> Term {
        match (self.descriptor.scalar_tag(), term) {
            (Some(tag), Term::Literal(literal)) if tag.admits(&literal) => Term::Literal(literal.coerce(tag)),
            (_, term) => term,
        }
    }

    fn parse(&self, text: &str) -> BrokerResult<Term> {
        match self.descriptor.kind() {
            ValueKind::Data { tag, .. } => Literal::parse(*tag, text).map(Term::Literal).ok_or_else(|| {
                IntegrationError::UnparsableLiteral {
                    property: self.descriptor.property().clone(),
                    text: text.to_string(),
                    tag: *tag,
                    origin: self.descriptor.origin(),
                }
                .into()
            }),
            ValueKind::Object { .. } => Ok(Term::Individual(Iri::new(text.trim()))),
        }
    }

    // Functional operations.

    /// The current value. Fails with `UninitializedValue` if there is none.
    pub fn get(&self) -> BrokerResult<Term> {
        self.try_get()?.ok_or_else(|| {
            IntegrationError::UninitializedValue {
                property: self.descriptor.property().clone(),
                individual: self.individual.clone(),
                origin: self.descriptor.origin(),
            }
            .into()
        })
    }

    /// The current value, or `None` if there is none.
    pub fn try_get(&self) -> BrokerResult<Option<Term>> {
        self.require(ExpectedCardinality::Functional, "get")?;
        match &self.lock()?.data {
            ValueData::Functional { stored, .. } => Ok(stored.clone()),
            ValueData::NonFunctional { .. } => Err(self.impossible("functional read of set binding")),
        }
    }

    /// The current value of a data property.
    pub fn get_literal(&self) -> BrokerResult<Literal> {
        self.require_kind(PropertyKind::Data)?;
        match self.get()? {
            Term::Literal(literal) => Ok(literal),
            Term::Individual(_) => Err(self.impossible("individual held by data binding")),
        }
    }

    /// The individual referenced by an object property.
    pub fn get_individual(&self) -> BrokerResult<Instance> {
        self.require_kind(PropertyKind::Object)?;
        match self.get()? {
            Term::Individual(iri) => Ok(Instance::new(iri)),
            Term::Literal(_) => Err(self.impossible("literal held by object binding")),
        }
    }

    /// Replaces the value, returning the previous one.
    pub fn set(&self, value: impl Into<Term>) -> BrokerResult<Option<Term>> {
        self.require(ExpectedCardinality::Functional, "set")?;
        self.require_writable("set")?;
        let value = self.admit(value.into())?;
        self.replace(Some(value))
    }

    /// Parses `text` according to the property's tag, then [`set`](Self::set)s it.
    pub fn set_from_string(&self, text: &str) -> BrokerResult<Option<Term>> {
        self.require(ExpectedCardinality::Functional, "set")?;
        self.require_writable("set")?;
        let value = self.admit(self.parse(text)?)?;
        self.replace(Some(value))
    }

    /// Clears the value, returning the previous one.
    pub fn unset(&self) -> BrokerResult<Option<Term>> {
        self.require(ExpectedCardinality::Functional, "unset")?;
        self.require_writable("unset")?;
        self.replace(None)
    }

    fn replace(&self, value: Option<Term>) -> BrokerResult<Option<Term>> {
        match &mut self.lock()?.data {
            ValueData::Functional { stored, .. } => Ok(std::mem::replace(stored, value)),
            ValueData::NonFunctional { .. } => Err(self.impossible("functional write to set binding")),
        }
    }

    pub fn state(&self) -> BrokerResult<FunctionalState> {
        self.require(ExpectedCardinality::Functional, "state")?;
        match &self.lock()?.data {
            ValueData::Functional { stored: Some(_), .. } => Ok(FunctionalState::Present),
            ValueData::Functional { original: Some(_), stored: None } => Ok(FunctionalState::Unset),
            ValueData::Functional { .. } => Ok(FunctionalState::WriteOnly),
            ValueData::NonFunctional { .. } => Err(self.impossible("state of set binding")),
        }
    }

    /// Orders two functional bindings by value; absent values sort first.
    pub fn compare_to(&self, other: &Self) -> BrokerResult<Ordering> {
        self.require(ExpectedCardinality::Functional, "compare_to")?;
        other.require(ExpectedCardinality::Functional, "compare_to")?;
        let left = self.try_get()?;
        let right = other.try_get()?;
        Ok(self.descriptor.compare_terms(left.as_ref(), right.as_ref()))
    }

    // Non-functional operations.

    /// Adds a value. Returns false if it was already present.
    pub fn add(&self, value: impl Into<Term>) -> BrokerResult<bool> {
        self.require(ExpectedCardinality::NonFunctional, "add")?;
        self.require_writable("add")?;
        let value = self.admit(value.into())?;
        self.with_set(|set| set.insert(value))
    }

    /// Parses `text` under the declared tag and adds the result.
    pub fn add_from_string(&self, text: &str) -> BrokerResult<bool> {
        self.require(ExpectedCardinality::NonFunctional, "add")?;
        self.require_writable("add")?;
        let value = self.admit(self.parse(text)?)?;
        self.with_set(|set| set.insert(value))
    }

    /// Removes a value. Returns false if it was not present.
    pub fn remove(&self, value: impl Into<Term>) -> BrokerResult<bool> {
        self.require(ExpectedCardinality::NonFunctional, "remove")?;
        self.require_writable("remove")?;
        let value = self.canonical(value.into());
        self.with_set(|set| set.remove(&value))
    }

    /// Membership test against the current, possibly uncommitted, set.
    pub fn has(&self, value: impl Into<Term>) -> BrokerResult<bool> {
        self.require(ExpectedCardinality::NonFunctional, "has")?;
        let value = self.canonical(value.into());
        self.with_set(|set| set.contains(&value))
    }

    /// Removes every value, returning how many were held.
    pub fn clear(&self) -> BrokerResult<usize> {
        self.require(ExpectedCardinality::NonFunctional, "clear")?;
        self.require_writable("clear")?;
        self.with_set(|set| {
            let n = set.len();
            set.clear();
            n
        })
    }

    /// Copies every value into `sink`, returning how many were copied.
    pub fn get_all<E: Extend<Term>>(&self, sink: &mut E) -> BrokerResult<usize> {
        self.require(ExpectedCardinality::NonFunctional, "get_all")?;
        self.with_set(|set| {
            sink.extend(set.iter().cloned());
            set.len()
        })
    }

    /// Snapshot of the current values.
    pub fn values(&self) -> BrokerResult<BTreeSet<Term>> {
        self.require(ExpectedCardinality::NonFunctional, "values")?;
        self.with_set(|set| set.clone())
    }

    /// Iterates a snapshot; later mutations are not observed.
    pub fn iter(&self) -> BrokerResult<std::collections::btree_set::IntoIter<Term>> {
        Ok(self.values()?.into_iter())
    }

    fn with_set<R>(&self, f: impl FnOnce(&mut BTreeSet<Term>) -> R) -> BrokerResult<R> {
        match &mut self.lock()?.data {
            ValueData::NonFunctional { stored, .. } => Ok(f(stored)),
            ValueData::Functional { .. } => Err(self.impossible("set operation on functional binding")),
        }
    }

    fn require_kind(&self, expected: PropertyKind) -> BrokerResult<()> {
        if self.descriptor.kind().property_kind() == expected {
            Ok(())
        } else {
            Err(IntegrationError::KindMismatch {
                property: self.descriptor.property().clone(),
                expected,
            }
            .into())
        }
    }

    fn impossible(&self, what: &str) -> BrokerError {
        BrokerError::internal(format!("{what} for {self}"))
    }

    // Commit protocol.

    fn tag_for(&self, term: &Term) -> ScalarTag {
        match (self.descriptor.scalar_tag(), term) {
            (Some(ScalarTag::Any) | None, Term::Literal(literal)) => literal.tag(),
            (Some(tag), _) => tag,
            (None, Term::Individual(_)) => ScalarTag::Any,
        }
    }

    /// Changes needed to bring the store in line with this binding.
    ///
    /// Empty when nothing changed. Retractions precede assertions.
    pub(crate) fn pending_changes(&self) -> BrokerResult<Vec<StoreChange>> {
        let binding = self.lock()?;
        if !binding.data.is_dirty() {
            return Ok(Vec::new());
        }
        if !binding.writable {
            return Err(self.read_only_violation("update"));
        }
        let subject = &self.individual;
        let property = self.descriptor.property();
        let mut changes = Vec::new();
        match &binding.data {
            ValueData::Functional { original, stored } => {
                if let Some(old) = original {
                    changes.push(StoreChange::retract(subject, property, old, self.tag_for(old)));
                }
                if let Some(new) = stored {
                    changes.push(StoreChange::assert(subject, property, new, self.tag_for(new)));
                }
            }
            ValueData::NonFunctional { original, stored } => {
                for old in original.difference(stored) {
                    changes.push(StoreChange::retract(subject, property, old, self.tag_for(old)));
                }
                for new in stored.difference(original) {
                    changes.push(StoreChange::assert(subject, property, new, self.tag_for(new)));
                }
            }
        }
        Ok(changes)
    }

    /// Records that the store now holds what this binding holds.
    pub(crate) fn mark_committed(&self) -> BrokerResult<()> {
        match &mut self.lock()?.data {
            ValueData::Functional { original, stored } => original.clone_from(stored),
            ValueData::NonFunctional { original, stored } => original.clone_from(stored),
        }
        Ok(())
    }

    /// Drops every reference to `target`, which the store no longer knows.
    pub(crate) fn forget_reference(&self, target: &Iri) -> BrokerResult<()> {
        let gone = Term::Individual(target.clone());
        match &mut self.lock()?.data {
            ValueData::Functional { original, stored } => {
                if original.as_ref() == Some(&gone) {
                    *original = None;
                }
                if stored.as_ref() == Some(&gone) {
                    *stored = None;
                }
            }
            ValueData::NonFunctional { original, stored } => {
                original.remove(&gone);
                stored.remove(&gone);
            }
        }
        Ok(())
    }
}
