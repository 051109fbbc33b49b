//! Concepts: classification and schema descriptors.
//!
//! A [`Concept`] does not own its members. Membership is whatever the store
//! (through its reasoner) reports; the concept mediates how individuals
//! enter and leave that set and which properties they are expected to carry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::broker::ModelStateBroker;
use crate::descriptor::{Access, PropertyDescriptor};
use crate::error::{BrokerResult, IntegrationError};
use crate::instance::Instance;
use crate::iri::Iri;
use crate::literal::ScalarTag;
use crate::store::{KnowledgeStore, Range, StoreChange};

/// Initializer run against a freshly classified member.
pub type Creator =
    Arc<dyn Fn(&ModelStateBroker, &Instance, &[Arc<PropertyDescriptor>]) -> BrokerResult<()> + Send + Sync>;

/// Named predicate over members.
pub type Query = Arc<dyn Fn(&ModelStateBroker, &Instance) -> BrokerResult<bool> + Send + Sync>;

/// A class of the schema.
pub struct Concept {
    iri: Iri,
    id_prefix: String,
    super_concepts: BTreeSet<Iri>,
    properties: Vec<Arc<PropertyDescriptor>>,
    creators: Vec<Creator>,
    queries: BTreeMap<String, Query>,
}

impl fmt::Debug for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Concept")
            .field("iri", &self.iri)
            .field("super_concepts", &self.super_concepts)
            .field(
                "properties",
                &self.properties.iter().map(|p| p.property()).collect::<Vec<_>>(),
            )
            .field("creators", &self.creators.len())
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iri)
    }
}

/// Turns a concept's local name into a valid identifier prefix.
fn id_prefix_for(iri: &Iri) -> String {
    let mut prefix: String = iri
        .local_name()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    if !prefix.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        prefix.insert(0, '_');
    }
    prefix
}

fn domain_in_scope(store: &dyn KnowledgeStore, property: &Iri, scope: &BTreeSet<Iri>) -> BrokerResult<bool> {
    Ok(store.declared_domain_of(property)?.is_some_and(|d| scope.contains(&d)))
}

fn range_in_scope(store: &dyn KnowledgeStore, property: &Iri, scope: &BTreeSet<Iri>) -> BrokerResult<bool> {
    Ok(matches!(store.declared_range_of(property)?, Some(Range::Concept(range)) if scope.contains(&range)))
}

impl Concept {
    /// Builds the concept from the store schema.
    ///
    /// Its properties are every declared property whose domain is the
    /// concept or one of its super-concepts, with mutating access.
    pub fn from_schema(broker: &ModelStateBroker, iri: impl Into<Iri>) -> BrokerResult<Self> {
        let iri = iri.into();
        let store = broker.store();
        if !store.has_concept(&iri)? {
            return Err(IntegrationError::NoSuchConcept { concept: iri }.into());
        }
        let super_concepts = store.super_classes_of(&iri)?;
        let mut properties = Vec::new();
        for decl in store.property_declarations()? {
            let in_scope = decl
                .domain
                .as_ref()
                .is_some_and(|d| *d == iri || super_concepts.contains(d));
            if in_scope {
                properties.push(broker.get_variable(decl.property, Access::mutating())?);
            }
        }
        Ok(Self {
            id_prefix: id_prefix_for(&iri),
            iri,
            super_concepts,
            properties,
            creators: Vec::new(),
            queries: BTreeMap::new(),
        })
    }

    /// Adds an initializer run by every `create_instance*` call.
    #[must_use]
    pub fn with_creator<F>(mut self, creator: F) -> Self
    where
        F: Fn(&ModelStateBroker, &Instance, &[Arc<PropertyDescriptor>]) -> BrokerResult<()> + Send + Sync + 'static,
    {
        self.creators.push(Arc::new(creator));
        self
    }

    #[must_use]
    pub fn with_query<F>(mut self, name: impl Into<String>, query: F) -> Self
    where
        F: Fn(&ModelStateBroker, &Instance) -> BrokerResult<bool> + Send + Sync + 'static,
    {
        self.queries.insert(name.into(), Arc::new(query));
        self
    }

    /// Overrides the prefix of generated member identifiers.
    #[must_use]
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    #[must_use]
    pub const fn iri(&self) -> &Iri {
        &self.iri
    }

    #[must_use]
    pub const fn super_concepts(&self) -> &BTreeSet<Iri> {
        &self.super_concepts
    }

    /// Properties members are expected to carry.
    #[must_use]
    pub fn properties(&self) -> &[Arc<PropertyDescriptor>] {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, name: &Iri) -> Option<&Arc<PropertyDescriptor>> {
        self.properties.iter().find(|p| p.property() == name)
    }

    pub fn query_names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    fn is_member(&self, broker: &ModelStateBroker, individual: &Iri) -> BrokerResult<bool> {
        Ok(broker.store().classes_of(individual)?.contains(&self.iri))
    }

    fn already_classified(&self, individual: Iri) -> IntegrationError {
        IntegrationError::AlreadyClassified {
            individual,
            concept: self.iri.clone(),
        }
    }

    // Creation.

    /// Creates a member under a freshly generated identifier.
    pub fn create_instance(&self, broker: &ModelStateBroker) -> BrokerResult<Instance> {
        let iri = loop {
            let candidate = broker.identifiers().next_id(&self.id_prefix)?;
            if broker.store().resolve(&candidate)?.is_none() {
                break candidate;
            }
        };
        broker.store().create_individual(&iri)?;
        self.classify_and_initialize(broker, Instance::new(iri), true)
    }

    /// Classifies the individual named `id`, creating it if needed.
    pub fn create_instance_with_id(&self, broker: &ModelStateBroker, id: impl Into<Iri>) -> BrokerResult<Instance> {
        let id = id.into();
        let (iri, created) = match broker.store().resolve(&id)? {
            Some(iri) if self.is_member(broker, &iri)? => return Err(self.already_classified(iri).into()),
            Some(iri) => (iri, false),
            None => {
                broker.store().create_individual(&id)?;
                (id, true)
            }
        };
        self.classify_and_initialize(broker, Instance::new(iri), created)
    }

    /// Classifies an existing individual and runs the initializers.
    pub fn create_instance_from(&self, broker: &ModelStateBroker, instance: &Instance) -> BrokerResult<Instance> {
        let instance = broker.resolve(instance.iri().clone())?;
        if self.is_member(broker, instance.iri())? {
            return Err(self.already_classified(instance.iri().clone()).into());
        }
        self.classify_and_initialize(broker, instance, false)
    }

    /// Classifies an existing individual without running the initializers.
    pub fn add_instance(&self, broker: &ModelStateBroker, instance: &Instance) -> BrokerResult<Instance> {
        let instance = broker.resolve(instance.iri().clone())?;
        if self.is_member(broker, instance.iri())? {
            return Err(self.already_classified(instance.iri().clone()).into());
        }
        broker.store().assert_class(instance.iri(), &self.iri)?;
        Ok(instance)
    }

    /// Asserts membership and runs the creators.
    ///
    /// If a creator fails, the creation is undone before its error is
    /// returned: an individual made by this call is removed, otherwise only
    /// the class assertion and the values registered for this concept's
    /// properties are dropped.
    fn classify_and_initialize(
        &self,
        broker: &ModelStateBroker,
        instance: Instance,
        created: bool,
    ) -> BrokerResult<Instance> {
        broker.store().assert_class(instance.iri(), &self.iri)?;
        for creator in &self.creators {
            if let Err(err) = creator(broker, &instance, self.properties.as_slice()) {
                if let Err(undo) = self.undo_creation(broker, &instance, created) {
                    tracing::error!(
                        target: "modelstate::concept",
                        concept = %self.iri,
                        individual = %instance,
                        error = %undo,
                        "could not undo failed creation"
                    );
                }
                tracing::warn!(
                    target: "modelstate::concept",
                    concept = %self.iri,
                    individual = %instance,
                    error = %err,
                    "creator failed"
                );
                return Err(err);
            }
        }
        tracing::debug!(
            target: "modelstate::concept",
            concept = %self.iri,
            individual = %instance,
            creators = self.creators.len(),
            "created instance"
        );
        Ok(instance)
    }

    fn undo_creation(&self, broker: &ModelStateBroker, instance: &Instance, created: bool) -> BrokerResult<()> {
        let individual = instance.iri();
        if created {
            broker.store().remove_individual(individual)?;
            broker.evict_individual(individual)?;
            broker.forget_references(individual, |_| true)?;
        } else {
            broker.store().retract_class(individual, &self.iri)?;
            let keys = self
                .properties
                .iter()
                .map(|p| (individual.clone(), p.property().clone()))
                .collect::<BTreeSet<_>>();
            broker.evict(&keys)?;
        }
        Ok(())
    }

    // Lookup.

    /// The member named `id`.
    pub fn get_instance(&self, broker: &ModelStateBroker, id: impl Into<Iri>) -> BrokerResult<Instance> {
        let instance = broker.resolve(id)?;
        if !self.is_member(broker, instance.iri())? {
            return Err(IntegrationError::NotAMember {
                individual: instance.iri().clone(),
                concept: self.iri.clone(),
            }
            .into());
        }
        Ok(instance)
    }

    pub fn has_instance(&self, broker: &ModelStateBroker, id: impl Into<Iri>) -> BrokerResult<bool> {
        match broker.store().resolve(&id.into())? {
            Some(iri) => self.is_member(broker, &iri),
            None => Ok(false),
        }
    }

    /// Every member, asserted or inferred.
    pub fn instances(&self, broker: &ModelStateBroker) -> BrokerResult<Vec<Instance>> {
        Ok(broker
            .store()
            .members_of(&self.iri)?
            .into_iter()
            .map(Instance::new)
            .collect())
    }

    /// Members for which the named query holds.
    pub fn query(&self, broker: &ModelStateBroker, name: &str) -> BrokerResult<Vec<Instance>> {
        let query = self.queries.get(name).ok_or_else(|| IntegrationError::NoSuchQuery {
            concept: self.iri.clone(),
            query: name.to_string(),
        })?;
        let mut out = Vec::new();
        for instance in self.instances(broker)? {
            if query(broker, &instance)? {
                out.push(instance);
            }
        }
        Ok(out)
    }

    // Removal.

    /// Removes `instance` from this concept and its sub-concepts.
    ///
    /// Property assertions that would let the reasoner re-derive membership
    /// are retracted as well: those whose domain is in scope and whose
    /// subject is the individual, and those whose range is in scope and whose
    /// object is the individual. Class and property retractions are applied
    /// as one batch. Registered values are cleaned up the same way, including
    /// changes not yet committed.
    pub fn declassify_instance(&self, broker: &ModelStateBroker, instance: &Instance) -> BrokerResult<()> {
        let store = broker.store().as_ref();
        let individual = broker.resolve(instance.iri().clone())?.iri().clone();
        if !self.is_member(broker, &individual)? {
            return Err(IntegrationError::NotAMember {
                individual,
                concept: self.iri.clone(),
            }
            .into());
        }

        let mut scope = store.sub_classes_of(&self.iri)?;
        scope.insert(self.iri.clone());

        let mut changes: Vec<StoreChange> = store
            .asserted_classes_of(&individual)?
            .into_iter()
            .filter(|c| scope.contains(c))
            .map(|concept| StoreChange::RetractClass {
                individual: individual.clone(),
                concept,
            })
            .collect();

        let mut evicted = BTreeSet::new();
        for st in store.statements_with_subject(&individual)? {
            if domain_in_scope(store, &st.property, &scope)? {
                let tag = st.object.as_literal().map_or(ScalarTag::Any, |l| l.tag());
                changes.push(StoreChange::retract(&st.subject, &st.property, &st.object, tag));
                evicted.insert((st.subject, st.property));
            }
        }
        let mut referrers = BTreeSet::new();
        for st in store.statements_with_object(&individual)? {
            if range_in_scope(store, &st.property, &scope)? {
                changes.push(StoreChange::retract(&st.subject, &st.property, &st.object, ScalarTag::Any));
                referrers.insert((st.subject, st.property));
            }
        }
        // Uncommitted values would be written back by the next update.
        for key in broker.registered_keys()? {
            if key.0 == individual && domain_in_scope(store, &key.1, &scope)? {
                evicted.insert(key.clone());
            }
            if range_in_scope(store, &key.1, &scope)? {
                referrers.insert(key);
            }
        }

        store.apply(&changes)?;
        broker.evict(&evicted)?;
        broker.forget_references(&individual, |key| referrers.contains(key))?;
        tracing::debug!(
            target: "modelstate::concept",
            concept = %self.iri,
            %individual,
            retracted = changes.len(),
            evicted = evicted.len(),
            "declassified instance"
        );
        Ok(())
    }

    /// Removes the individual and every assertion mentioning it.
    pub fn delete_instance(&self, broker: &ModelStateBroker, instance: &Instance) -> BrokerResult<()> {
        let individual = instance.iri();
        if broker.store().resolve(individual)?.is_none() {
            return Err(IntegrationError::NoSuchEntity {
                individual: individual.clone(),
            }
            .into());
        }
        broker.store().remove_individual(individual)?;
        broker.evict_individual(individual)?;
        broker.forget_references(individual, |_| true)?;
        tracing::debug!(target: "modelstate::concept", concept = %self.iri, %individual, "deleted instance");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::BrokerConfig;
    use crate::literal::Term;
    use crate::store::{InMemoryStore, KnowledgeStore, PropertyDeclaration};

    fn setup() -> (Arc<InMemoryStore>, ModelStateBroker) {
        let store = Arc::new(InMemoryStore::new());
        store.declare_concept("Animal", Vec::<Iri>::new()).unwrap();
        store.declare_concept("Cow", ["Animal"]).unwrap();
        store.declare_concept("Person", Vec::<Iri>::new()).unwrap();
        store
            .declare_property(PropertyDeclaration::data("age", true, Some(ScalarTag::Integer)).with_domain("Animal"))
            .unwrap();
        store
            .declare_property(PropertyDeclaration::data("milk", true, Some(ScalarTag::Double)).with_domain("Cow"))
            .unwrap();
        store
            .declare_property(PropertyDeclaration::object("owns", false, Some(Iri::new("Cow"))).with_domain("Person"))
            .unwrap();
        let broker = ModelStateBroker::new(store.clone(), BrokerConfig::default()).unwrap();
        (store, broker)
    }

    #[test]
    fn test_from_schema_collects_inherited_properties() {
        let (_, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        let mut names: Vec<_> = cow.properties().iter().map(|p| p.property().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["age", "milk"]);
        assert!(cow.super_concepts().contains(&Iri::new("Animal")));

        let err = broker.concept("Unicorn").unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::NoSuchConcept { .. })));
    }

    #[test]
    fn test_create_instance_runs_creators() {
        let (_, broker) = setup();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let cow = Concept::from_schema(&broker, "Cow")
            .unwrap()
            .with_creator(move |broker, instance, props| {
                counter.fetch_add(1, Ordering::SeqCst);
                let age = props.iter().find(|p| p.property().as_str() == "age").unwrap();
                age.new_value_for(broker, instance)?.set(0)?;
                Ok(())
            });
        let cow = broker.register_concept(cow).unwrap();

        let a = cow.create_instance(&broker).unwrap();
        let b = cow.create_instance(&broker).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.iri().as_str(), "urn:modelstate:Cow_1");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(a.is_a(&broker, &Iri::new("Animal")).unwrap());

        // add_instance classifies without initializers.
        let c = broker.create_individual("c").unwrap();
        cow.add_instance(&broker, &c).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_generated_ids_skip_existing_individuals() {
        let (_, broker) = setup();
        broker.create_individual("urn:modelstate:Cow_1").unwrap();
        let cow = broker.concept("Cow").unwrap();
        assert_eq!(cow.create_instance(&broker).unwrap().iri().as_str(), "urn:modelstate:Cow_2");
    }

    #[test]
    fn test_classifying_twice_fails() {
        let (_, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        cow.create_instance_with_id(&broker, "daisy").unwrap();
        let err = cow.create_instance_with_id(&broker, "daisy").unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::AlreadyClassified { .. })));

        let daisy = broker.resolve("daisy").unwrap();
        let err = cow.add_instance(&broker, &daisy).unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::AlreadyClassified { .. })));
        let err = cow.create_instance_from(&broker, &daisy).unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::AlreadyClassified { .. })));
    }

    #[test]
    fn test_lookup_does_not_classify() {
        let (_, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        broker.create_individual("rock").unwrap();
        assert!(!cow.has_instance(&broker, "rock").unwrap());
        assert!(!cow.has_instance(&broker, "nothing").unwrap());
        let err = cow.get_instance(&broker, "rock").unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::NotAMember { .. })));
        assert!(cow.instances(&broker).unwrap().is_empty());
    }

    #[test]
    fn test_declassify_retracts_domain_and_range_assertions() {
        let (store, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        let daisy = cow.create_instance_with_id(&broker, "daisy").unwrap();
        let farmer = broker.create_individual("farmer").unwrap();
        broker.concept("Person").unwrap().add_instance(&broker, &farmer).unwrap();

        let milk = broker.get_variable("milk", Access::mutating()).unwrap();
        let owns = broker.get_variable("owns", Access::mutating()).unwrap();
        milk.value_for(&broker, &daisy).unwrap().set(12.5).unwrap();
        owns.value_for(&broker, &farmer).unwrap().add(daisy.iri().clone()).unwrap();
        broker.update().unwrap();

        // Keep a live binding of the referrer across declassification.
        let owned = owns.value_for(&broker, &farmer).unwrap();
        cow.declassify_instance(&broker, &daisy).unwrap();

        assert!(!daisy.is_a(&broker, &Iri::new("Cow")).unwrap());
        assert!(!milk.has_value_for(&broker, &daisy).unwrap());
        assert!(!owned.has(daisy.iri().clone()).unwrap());
        assert!(store.object_values_of(farmer.iri(), owns.property()).unwrap().is_empty());

        // Nothing stale is written back.
        let report = broker.update().unwrap();
        assert_eq!(report.writes, 0);

        let err = cow.declassify_instance(&broker, &daisy).unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::NotAMember { .. })));
    }

    #[test]
    fn test_declassify_drops_uncommitted_subject_values() {
        let (store, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        let daisy = cow.create_instance_with_id(&broker, "daisy").unwrap();
        let milk = broker.get_variable("milk", Access::mutating()).unwrap();
        milk.value_for(&broker, &daisy).unwrap().set(12.5).unwrap();

        cow.declassify_instance(&broker, &daisy).unwrap();
        assert!(!milk.has_value_for(&broker, &daisy).unwrap());

        let report = broker.update().unwrap();
        assert_eq!(report.writes, 0);
        assert!(store.data_values_of(daisy.iri(), milk.property()).unwrap().is_empty());
        assert!(!daisy.is_a(&broker, &Iri::new("Cow")).unwrap());
    }

    #[test]
    fn test_declassify_drops_uncommitted_references() {
        let (store, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        let daisy = cow.create_instance_with_id(&broker, "daisy").unwrap();
        let farmer = broker.concept("Person").unwrap().create_instance_with_id(&broker, "farmer").unwrap();
        let owns = broker.get_variable("owns", Access::mutating()).unwrap();
        let owned = owns.value_for(&broker, &farmer).unwrap();
        owned.add(daisy.iri().clone()).unwrap();

        cow.declassify_instance(&broker, &daisy).unwrap();
        assert!(!owned.has(daisy.iri().clone()).unwrap());

        broker.update().unwrap();
        assert!(store.object_values_of(farmer.iri(), owns.property()).unwrap().is_empty());
        assert!(!daisy.is_a(&broker, &Iri::new("Cow")).unwrap());
    }

    #[test]
    fn test_declassify_keeps_pending_edits_outside_scope() {
        let (_, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        let daisy = cow.create_instance_with_id(&broker, "daisy").unwrap();
        let age = broker.get_variable("age", Access::mutating()).unwrap();
        age.value_for(&broker, &daisy).unwrap().set(4).unwrap();

        // age belongs to Animal, which is above the declassified concept.
        cow.declassify_instance(&broker, &daisy).unwrap();
        assert!(age.has_value_for(&broker, &daisy).unwrap());
        broker.update().unwrap();
        assert!(daisy.is_a(&broker, &Iri::new("Animal")).unwrap());
        assert!(!daisy.is_a(&broker, &Iri::new("Cow")).unwrap());
    }

    #[test]
    fn test_delete_drops_uncommitted_values_and_references() {
        let (store, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        let daisy = cow.create_instance_with_id(&broker, "daisy").unwrap();
        let farmer = broker.concept("Person").unwrap().create_instance_with_id(&broker, "farmer").unwrap();
        let milk = broker.get_variable("milk", Access::mutating()).unwrap();
        let owns = broker.get_variable("owns", Access::mutating()).unwrap();
        milk.value_for(&broker, &daisy).unwrap().set(3.0).unwrap();
        owns.value_for(&broker, &farmer).unwrap().add(daisy.iri().clone()).unwrap();

        cow.delete_instance(&broker, &daisy).unwrap();
        assert!(broker.materialized_for(&daisy).unwrap().is_empty());
        assert_eq!(broker.update().unwrap().writes, 0);
        assert_eq!(store.statement_count().unwrap(), 0);
    }

    #[test]
    fn test_failed_creator_removes_new_individual() {
        let (store, broker) = setup();
        let cow = Concept::from_schema(&broker, "Cow")
            .unwrap()
            .with_creator(|broker, instance, props| {
                let milk = props.iter().find(|p| p.property().as_str() == "milk").unwrap();
                milk.value_for(broker, instance)?.set(1.0)?;
                // age is functional: add is rejected.
                let age = props.iter().find(|p| p.property().as_str() == "age").unwrap();
                age.value_for(broker, instance)?.add(1)?;
                Ok(())
            });
        let cow = broker.register_concept(cow).unwrap();

        let err = cow.create_instance_with_id(&broker, "daisy").unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::WrongCardinality { .. })));
        assert_eq!(store.resolve(&Iri::new("daisy")).unwrap(), None);
        assert_eq!(broker.registered_count().unwrap(), 0);

        let err = cow.create_instance(&broker).unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::WrongCardinality { .. })));
        assert!(cow.instances(&broker).unwrap().is_empty());
        assert_eq!(broker.update().unwrap().writes, 0);
    }

    #[test]
    fn test_failed_creator_unclassifies_existing_individual() {
        let (store, broker) = setup();
        let cow = Concept::from_schema(&broker, "Cow")
            .unwrap()
            .with_creator(|broker, instance, props| {
                let milk = props.iter().find(|p| p.property().as_str() == "milk").unwrap();
                milk.value_for(broker, instance)?.set(1.0)?;
                Err(IntegrationError::NoSuchQuery {
                    concept: Iri::new("Cow"),
                    query: "pasture".to_string(),
                }
                .into())
            });
        let cow = broker.register_concept(cow).unwrap();
        let rock = broker.create_individual("rock").unwrap();

        cow.create_instance_from(&broker, &rock).unwrap_err();
        assert_eq!(store.resolve(rock.iri()).unwrap(), Some(rock.iri().clone()));
        assert!(store.asserted_classes_of(rock.iri()).unwrap().is_empty());
        assert_eq!(broker.registered_count().unwrap(), 0);
        assert_eq!(broker.update().unwrap().writes, 0);
    }

    #[test]
    fn test_declassify_keeps_unrelated_memberships() {
        let (_, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        let animal = broker.concept("Animal").unwrap();
        let daisy = cow.create_instance_with_id(&broker, "daisy").unwrap();
        animal.add_instance(&broker, &daisy).unwrap_err();

        let rex = broker.create_individual("rex").unwrap();
        animal.add_instance(&broker, &rex).unwrap();
        let age = broker.get_variable("age", Access::mutating()).unwrap();
        age.value_for(&broker, &rex).unwrap().set(3).unwrap();
        broker.update().unwrap();

        // rex is an Animal but not a Cow.
        let err = cow.declassify_instance(&broker, &rex).unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::NotAMember { .. })));
        assert_eq!(age.existing_value_for(&broker, &rex).unwrap().get().unwrap(), Term::from(3));
    }

    #[test]
    fn test_delete_instance_removes_everything() {
        let (store, broker) = setup();
        let cow = broker.concept("Cow").unwrap();
        let person = broker.concept("Person").unwrap();
        let daisy = cow.create_instance_with_id(&broker, "daisy").unwrap();
        let farmer = person.create_instance_with_id(&broker, "farmer").unwrap();

        let owns = broker.get_variable("owns", Access::mutating()).unwrap();
        owns.value_for(&broker, &farmer).unwrap().add(daisy.iri().clone()).unwrap();
        broker.update().unwrap();

        let owned = owns.value_for(&broker, &farmer).unwrap();
        cow.delete_instance(&broker, &daisy).unwrap();
        assert!(broker.resolve("daisy").is_err());
        assert_eq!(owned.n_elements().unwrap(), 0);
        assert_eq!(store.statement_count().unwrap(), 0);
        assert_eq!(broker.update().unwrap().writes, 0);

        let err = cow.delete_instance(&broker, &daisy).unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::NoSuchEntity { .. })));
    }

    #[test]
    fn test_queries_filter_members() {
        let (_, broker) = setup();
        let age = broker.get_variable("age", Access::read_only()).unwrap();
        let age_q = Arc::clone(&age);
        let animal = Concept::from_schema(&broker, "Animal")
            .unwrap()
            .with_query("adult", move |broker, instance| {
                let v = age_q.value_for(broker, instance)?;
                Ok(v.try_get()?.is_some_and(|t| t.compare_value(&Term::from(2), None).is_ge()))
            });
        let animal = broker.register_concept(animal).unwrap();

        let writer = broker.get_variable("age", Access::mutating()).unwrap();
        for (name, years) in [("a", 1), ("b", 5)] {
            let e = animal.create_instance_with_id(&broker, name).unwrap();
            writer.value_for(&broker, &e).unwrap().set(years).unwrap();
        }
        broker.update().unwrap();

        let adults = animal.query(&broker, "adult").unwrap();
        assert_eq!(adults, vec![broker.resolve("b").unwrap()]);
        assert_eq!(animal.query_names().collect::<Vec<_>>(), vec!["adult"]);

        let err = animal.query(&broker, "calf").unwrap_err();
        assert!(matches!(err.as_integration(), Some(IntegrationError::NoSuchQuery { .. })));
    }

    #[test]
    fn test_id_prefix_sanitized() {
        assert_eq!(id_prefix_for(&Iri::new("http://ex.org/onto#Cow")), "Cow");
        assert_eq!(id_prefix_for(&Iri::new("urn:x:42nd")), "_42nd");
    }
}
