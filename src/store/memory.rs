//! In-memory knowledge store.
//!
//! Thread-safe reference implementation of [`KnowledgeStore`], intended for
//! embedded usage and tests. Schema declarations (concepts and properties)
//! are made through inherent methods; everything the broker needs goes
//! through the trait.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::error::StoreError;
use crate::iri::Iri;
use crate::literal::{Literal, ScalarTag, Term};
use crate::store::reasoner::{close_over_super_classes, FactView, Reasoner, StructuralReasoner};
use crate::store::traits::{
    KnowledgeStore, PropertyDeclaration, PropertyKind, Statement, StoreChange,
};

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend(format!("poisoned lock: {context}"))
}

type Key = (Iri, Iri);

#[derive(Debug, Default)]
struct StoreState {
    individuals: BTreeSet<Iri>,
    /// concept -> direct super-concepts
    concepts: BTreeMap<Iri, BTreeSet<Iri>>,
    properties: BTreeMap<Iri, PropertyDeclaration>,
    /// individual -> asserted concepts
    types: BTreeMap<Iri, BTreeSet<Iri>>,
    data: BTreeMap<Key, BTreeSet<Literal>>,
    objects: BTreeMap<Key, BTreeSet<Iri>>,
    writes: u64,
}

/// Iterates the entries of `map` whose key has `subject` in first position.
fn subject_range<'a, V>(
    map: &'a BTreeMap<Key, V>,
    subject: &'a Iri,
) -> impl Iterator<Item = (&'a Key, &'a V)> + 'a {
    let start = (subject.clone(), Iri::new(""));
    map.range((Bound::Included(start), Bound::Unbounded))
        .take_while(move |((s, _), _)| s == subject)
}

impl FactView for StoreState {
    fn asserted_classes(&self, individual: &Iri) -> BTreeSet<Iri> {
        self.types.get(individual).cloned().unwrap_or_default()
    }

    fn direct_super_classes(&self, concept: &Iri) -> BTreeSet<Iri> {
        self.concepts.get(concept).cloned().unwrap_or_default()
    }

    fn outgoing_properties(&self, individual: &Iri) -> BTreeSet<Iri> {
        let data = subject_range(&self.data, individual)
            .filter(|(_, v)| !v.is_empty())
            .map(|((_, p), _)| p.clone());
        let objects = subject_range(&self.objects, individual)
            .filter(|(_, v)| !v.is_empty())
            .map(|((_, p), _)| p.clone());
        data.chain(objects).collect()
    }

    fn incoming_properties(&self, individual: &Iri) -> BTreeSet<Iri> {
        self.objects
            .iter()
            .filter(|(_, objects)| objects.contains(individual))
            .map(|((_, p), _)| p.clone())
            .collect()
    }

    fn domain_of(&self, property: &Iri) -> Option<Iri> {
        self.properties.get(property).and_then(|d| d.domain.clone())
    }

    fn range_concept_of(&self, property: &Iri) -> Option<Iri> {
        self.properties
            .get(property)
            .and_then(|d| d.range_concept().cloned())
    }
}

impl StoreState {
    fn require_individual(&self, id: &Iri) -> Result<(), StoreError> {
        if self.individuals.contains(id) {
            Ok(())
        } else {
            Err(StoreError::IndividualNotFound(id.clone()))
        }
    }

    fn require_property(&self, property: &Iri, kind: PropertyKind) -> Result<&PropertyDeclaration, StoreError> {
        let decl = self
            .properties
            .get(property)
            .ok_or_else(|| StoreError::UndeclaredProperty(property.clone()))?;
        if decl.kind != kind {
            return Err(StoreError::Backend(format!(
                "property {property} is a {} property, not {kind}",
                decl.kind
            )));
        }
        Ok(decl)
    }

    /// Validates a change without applying it. Returns the normalized literal
    /// for data assertions.
    fn check(&self, change: &StoreChange) -> Result<Option<Literal>, StoreError> {
        match change {
            StoreChange::AssertData { subject, property, literal, tag } => {
                self.require_individual(subject)?;
                self.require_property(property, PropertyKind::Data)?;
                if !tag.admits(literal) {
                    return Err(StoreError::LiteralTagMismatch {
                        literal: literal.to_string(),
                        tag: *tag,
                    });
                }
                Ok(Some(literal.clone().coerce(*tag)))
            }
            StoreChange::RetractData { property, literal, tag, .. } => {
                self.require_property(property, PropertyKind::Data)?;
                Ok(Some(literal.clone().coerce(*tag)))
            }
            StoreChange::AssertObject { subject, property, object } => {
                self.require_individual(subject)?;
                self.require_individual(object)?;
                self.require_property(property, PropertyKind::Object)?;
                Ok(None)
            }
            StoreChange::RetractObject { property, .. } => {
                self.require_property(property, PropertyKind::Object)?;
                Ok(None)
            }
            StoreChange::AssertClass { individual, concept } => {
                self.require_individual(individual)?;
                if !self.concepts.contains_key(concept) {
                    return Err(StoreError::Backend(format!("undeclared concept: {concept}")));
                }
                Ok(None)
            }
            StoreChange::RetractClass { individual, concept } => {
                if !self.types.get(individual).is_some_and(|types| types.contains(concept)) {
                    return Err(StoreError::NoSuchAssertion(format!("{individual} a {concept}")));
                }
                Ok(None)
            }
        }
    }

    /// Applies a change that already passed [`StoreState::check`].
    fn apply_checked(&mut self, change: &StoreChange, literal: Option<Literal>) {
        match (change, literal) {
            (StoreChange::AssertData { subject, property, .. }, Some(lit)) => {
                self.data
                    .entry((subject.clone(), property.clone()))
                    .or_default()
                    .insert(lit);
            }
            (StoreChange::RetractData { subject, property, .. }, Some(lit)) => {
                let key = (subject.clone(), property.clone());
                if let Some(values) = self.data.get_mut(&key) {
                    values.remove(&lit);
                    if values.is_empty() {
                        self.data.remove(&key);
                    }
                }
            }
            (StoreChange::AssertObject { subject, property, object }, _) => {
                self.objects
                    .entry((subject.clone(), property.clone()))
                    .or_default()
                    .insert(object.clone());
            }
            (StoreChange::RetractObject { subject, property, object }, _) => {
                let key = (subject.clone(), property.clone());
                if let Some(values) = self.objects.get_mut(&key) {
                    values.remove(object);
                    if values.is_empty() {
                        self.objects.remove(&key);
                    }
                }
            }
            (StoreChange::AssertClass { individual, concept }, _) => {
                self.types
                    .entry(individual.clone())
                    .or_default()
                    .insert(concept.clone());
            }
            (StoreChange::RetractClass { individual, concept }, _) => {
                if let Some(types) = self.types.get_mut(individual) {
                    types.remove(concept);
                }
            }
            // check() always yields a literal for data changes
            (StoreChange::AssertData { .. } | StoreChange::RetractData { .. }, None) => return,
        }
        self.writes += 1;
    }

    fn super_closure(&self, concept: &Iri) -> BTreeSet<Iri> {
        let mut classes = BTreeSet::from([concept.clone()]);
        close_over_super_classes(&mut classes, self);
        classes.remove(concept);
        classes
    }
}

/// Thread-safe in-memory knowledge store.
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    reasoner: Arc<dyn Reasoner>,
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("writes", &self.write_count())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store using [`StructuralReasoner`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_reasoner(Arc::new(StructuralReasoner))
    }

    /// Create an empty store with an explicit reasoner.
    #[must_use]
    pub fn with_reasoner(reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            reasoner,
        }
    }

    /// Declare a concept and its direct super-concepts.
    ///
    /// Super-concepts are declared implicitly if unknown.
    pub fn declare_concept<I, S>(&self, concept: impl Into<Iri>, supers: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Iri>,
    {
        let mut state = self.state.write().map_err(|_| lock_err("declare_concept"))?;
        let supers: BTreeSet<Iri> = supers.into_iter().map(Into::into).collect();
        for sup in &supers {
            state.concepts.entry(sup.clone()).or_default();
        }
        state.concepts.entry(concept.into()).or_default().extend(supers);
        Ok(())
    }

    /// Declare a property. Its domain and range concepts are declared implicitly.
    pub fn declare_property(&self, declaration: PropertyDeclaration) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("declare_property"))?;
        if let Some(domain) = &declaration.domain {
            state.concepts.entry(domain.clone()).or_default();
        }
        if let Some(range) = declaration.range_concept() {
            state.concepts.entry(range.clone()).or_default();
        }
        state
            .properties
            .insert(declaration.property.clone(), declaration);
        Ok(())
    }

    /// Number of effective writes applied so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        match self.state.read() {
            Ok(state) => state.writes,
            Err(poisoned) => poisoned.into_inner().writes,
        }
    }

    /// Total number of property assertions held.
    pub fn statement_count(&self) -> Result<usize, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("statement_count"))?;
        let data: usize = state.data.values().map(BTreeSet::len).sum();
        let objects: usize = state.objects.values().map(BTreeSet::len).sum();
        Ok(data + objects)
    }

    fn apply_one(&self, change: StoreChange, context: &'static str) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err(context))?;
        let literal = state.check(&change)?;
        state.apply_checked(&change, literal);
        Ok(())
    }
}

impl KnowledgeStore for InMemoryStore {
    fn resolve(&self, id: &Iri) -> Result<Option<Iri>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("resolve"))?;
        Ok(state.individuals.get(id).cloned())
    }

    fn create_individual(&self, id: &Iri) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("create_individual"))?;
        if !state.individuals.insert(id.clone()) {
            return Err(StoreError::DuplicateIndividual(id.clone()));
        }
        state.writes += 1;
        Ok(())
    }

    fn remove_individual(&self, id: &Iri) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("remove_individual"))?;
        if !state.individuals.remove(id) {
            return Err(StoreError::IndividualNotFound(id.clone()));
        }
        state.types.remove(id);
        state.data.retain(|(s, _), _| s != id);
        state.objects.retain(|(s, _), _| s != id);
        for objects in state.objects.values_mut() {
            objects.remove(id);
        }
        state.objects.retain(|_, objects| !objects.is_empty());
        state.writes += 1;
        Ok(())
    }

    fn has_concept(&self, concept: &Iri) -> Result<bool, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("has_concept"))?;
        Ok(state.concepts.contains_key(concept))
    }

    fn members_of(&self, concept: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("members_of"))?;
        Ok(state
            .individuals
            .iter()
            .filter(|i| self.reasoner.classify(i, &*state).contains(concept))
            .cloned()
            .collect())
    }

    fn classes_of(&self, individual: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("classes_of"))?;
        state.require_individual(individual)?;
        Ok(self.reasoner.classify(individual, &*state))
    }

    fn asserted_classes_of(&self, individual: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("asserted_classes_of"))?;
        state.require_individual(individual)?;
        Ok(state.asserted_classes(individual))
    }

    fn super_classes_of(&self, concept: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("super_classes_of"))?;
        Ok(state.super_closure(concept))
    }

    fn sub_classes_of(&self, concept: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("sub_classes_of"))?;
        Ok(state
            .concepts
            .keys()
            .filter(|c| *c != concept && state.super_closure(c).contains(concept))
            .cloned()
            .collect())
    }

    fn assert_class(&self, individual: &Iri, concept: &Iri) -> Result<(), StoreError> {
        self.apply_one(
            StoreChange::AssertClass {
                individual: individual.clone(),
                concept: concept.clone(),
            },
            "assert_class",
        )
    }

    fn retract_class(&self, individual: &Iri, concept: &Iri) -> Result<(), StoreError> {
        self.apply_one(
            StoreChange::RetractClass {
                individual: individual.clone(),
                concept: concept.clone(),
            },
            "retract_class",
        )
    }

    fn data_values_of(&self, individual: &Iri, property: &Iri) -> Result<BTreeSet<Literal>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("data_values_of"))?;
        Ok(state
            .data
            .get(&(individual.clone(), property.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn object_values_of(&self, individual: &Iri, property: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("object_values_of"))?;
        Ok(state
            .objects
            .get(&(individual.clone(), property.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn assert_data(&self, subject: &Iri, property: &Iri, literal: &Literal, tag: ScalarTag) -> Result<(), StoreError> {
        self.apply_one(
            StoreChange::AssertData {
                subject: subject.clone(),
                property: property.clone(),
                literal: literal.clone(),
                tag,
            },
            "assert_data",
        )
    }

    fn retract_data(&self, subject: &Iri, property: &Iri, literal: &Literal, tag: ScalarTag) -> Result<(), StoreError> {
        self.apply_one(
            StoreChange::RetractData {
                subject: subject.clone(),
                property: property.clone(),
                literal: literal.clone(),
                tag,
            },
            "retract_data",
        )
    }

    fn assert_object(&self, subject: &Iri, property: &Iri, object: &Iri) -> Result<(), StoreError> {
        self.apply_one(
            StoreChange::AssertObject {
                subject: subject.clone(),
                property: property.clone(),
                object: object.clone(),
            },
            "assert_object",
        )
    }

    fn retract_object(&self, subject: &Iri, property: &Iri, object: &Iri) -> Result<(), StoreError> {
        self.apply_one(
            StoreChange::RetractObject {
                subject: subject.clone(),
                property: property.clone(),
                object: object.clone(),
            },
            "retract_object",
        )
    }

    fn statements_with_subject(&self, individual: &Iri) -> Result<Vec<Statement>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("statements_with_subject"))?;
        let mut out = Vec::new();
        for ((s, p), values) in subject_range(&state.data, individual) {
            out.extend(values.iter().map(|l| Statement {
                subject: s.clone(),
                property: p.clone(),
                object: Term::Literal(l.clone()),
            }));
        }
        for ((s, p), values) in subject_range(&state.objects, individual) {
            out.extend(values.iter().map(|o| Statement {
                subject: s.clone(),
                property: p.clone(),
                object: Term::Individual(o.clone()),
            }));
        }
        Ok(out)
    }

    fn statements_with_object(&self, individual: &Iri) -> Result<Vec<Statement>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("statements_with_object"))?;
        Ok(state
            .objects
            .iter()
            .filter(|(_, objects)| objects.contains(individual))
            .map(|((s, p), _)| Statement {
                subject: s.clone(),
                property: p.clone(),
                object: Term::Individual(individual.clone()),
            })
            .collect())
    }

    fn property_declaration(&self, property: &Iri) -> Result<Option<PropertyDeclaration>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("property_declaration"))?;
        Ok(state.properties.get(property).cloned())
    }

    fn property_declarations(&self) -> Result<Vec<PropertyDeclaration>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("property_declarations"))?;
        Ok(state.properties.values().cloned().collect())
    }

    /// Validates the whole batch before mutating anything.
    fn apply(&self, changes: &[StoreChange]) -> Result<usize, StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("apply"))?;
        let checked = changes
            .iter()
            .map(|c| state.check(c))
            .collect::<Result<Vec<_>, _>>()?;
        for (change, literal) in changes.iter().zip(checked) {
            state.apply_checked(change, literal);
        }
        Ok(changes.len())
    }
}
