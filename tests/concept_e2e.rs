use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use modelstate::store::{InMemoryStore, KnowledgeStore, PropertyDeclaration, Statement, StoreChange};
use modelstate::{
    Access, BrokerConfig, Concept, GenerationChain, GenerationName, IdentifierService,
    IntegrationError, Iri, Literal, ModelStateBroker, ScalarTag, StoreError, Term,
};

fn schema() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.declare_concept("urn:C", Vec::<Iri>::new()).unwrap();
    store.declare_concept("urn:Herd", Vec::<Iri>::new()).unwrap();
    store
        .declare_property(
            PropertyDeclaration::data("urn:age", true, Some(ScalarTag::Integer)).with_domain("urn:C"),
        )
        .unwrap();
    store
        .declare_property(
            PropertyDeclaration::object("urn:member", false, Some(Iri::new("urn:C")))
                .with_domain("urn:Herd"),
        )
        .unwrap();
    store
}

/// Delegates to an in-memory store; batches fail while `reject` is set.
struct FlakyStore {
    inner: Arc<InMemoryStore>,
    reject: AtomicBool,
}

impl KnowledgeStore for FlakyStore {
    fn resolve(&self, id: &Iri) -> Result<Option<Iri>, StoreError> {
        self.inner.resolve(id)
    }
    fn create_individual(&self, id: &Iri) -> Result<(), StoreError> {
        self.inner.create_individual(id)
    }
    fn remove_individual(&self, id: &Iri) -> Result<(), StoreError> {
        self.inner.remove_individual(id)
    }
    fn has_concept(&self, concept: &Iri) -> Result<bool, StoreError> {
        self.inner.has_concept(concept)
    }
    fn members_of(&self, concept: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        self.inner.members_of(concept)
    }
    fn classes_of(&self, individual: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        self.inner.classes_of(individual)
    }
    fn asserted_classes_of(&self, individual: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        self.inner.asserted_classes_of(individual)
    }
    fn super_classes_of(&self, concept: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        self.inner.super_classes_of(concept)
    }
    fn sub_classes_of(&self, concept: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        self.inner.sub_classes_of(concept)
    }
    fn assert_class(&self, individual: &Iri, concept: &Iri) -> Result<(), StoreError> {
        self.inner.assert_class(individual, concept)
    }
    fn retract_class(&self, individual: &Iri, concept: &Iri) -> Result<(), StoreError> {
        self.inner.retract_class(individual, concept)
    }
    fn data_values_of(&self, individual: &Iri, property: &Iri) -> Result<BTreeSet<Literal>, StoreError> {
        self.inner.data_values_of(individual, property)
    }
    fn object_values_of(&self, individual: &Iri, property: &Iri) -> Result<BTreeSet<Iri>, StoreError> {
        self.inner.object_values_of(individual, property)
    }
    fn assert_data(&self, subject: &Iri, property: &Iri, literal: &Literal, tag: ScalarTag) -> Result<(), StoreError> {
        self.inner.assert_data(subject, property, literal, tag)
    }
    fn retract_data(&self, subject: &Iri, property: &Iri, literal: &Literal, tag: ScalarTag) -> Result<(), StoreError> {
        self.inner.retract_data(subject, property, literal, tag)
    }
    fn assert_object(&self, subject: &Iri, property: &Iri, object: &Iri) -> Result<(), StoreError> {
        self.inner.assert_object(subject, property, object)
    }
    fn retract_object(&self, subject: &Iri, property: &Iri, object: &Iri) -> Result<(), StoreError> {
        self.inner.retract_object(subject, property, object)
    }
    fn statements_with_subject(&self, individual: &Iri) -> Result<Vec<Statement>, StoreError> {
        self.inner.statements_with_subject(individual)
    }
    fn statements_with_object(&self, individual: &Iri) -> Result<Vec<Statement>, StoreError> {
        self.inner.statements_with_object(individual)
    }
    fn property_declaration(&self, property: &Iri) -> Result<Option<PropertyDeclaration>, StoreError> {
        self.inner.property_declaration(property)
    }
    fn property_declarations(&self) -> Result<Vec<PropertyDeclaration>, StoreError> {
        self.inner.property_declarations()
    }
    fn apply(&self, changes: &[StoreChange]) -> Result<usize, StoreError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("batch rejected".to_string()));
        }
        self.inner.apply(changes)
    }
}

#[test]
fn age_survives_commit_and_disappears_on_declassify() {
    let store = schema();
    let broker = ModelStateBroker::new(store, BrokerConfig::default()).unwrap();
    let c = broker.concept("urn:C").unwrap();
    let e1 = c.create_instance_with_id(&broker, "urn:e1").unwrap();

    let age = broker.get_variable("urn:age", Access::mutating()).unwrap();
    age.new_value_for(&broker, &e1).unwrap().set(5).unwrap();
    broker.update().unwrap();

    assert_eq!(
        age.existing_value_for(&broker, &e1).unwrap().get().unwrap(),
        Term::from(5)
    );

    c.declassify_instance(&broker, &e1).unwrap();
    assert!(!age.has_value_for(&broker, &e1).unwrap());
    assert!(!c.has_instance(&broker, "urn:e1").unwrap());
}

#[test]
fn inferred_membership_counts_for_lookup() {
    let store = schema();
    let broker = ModelStateBroker::new(store.clone(), BrokerConfig::default()).unwrap();
    let e = broker.create_individual("urn:e").unwrap();

    // Carrying a property whose domain is C makes e a member of C.
    let age = broker.get_variable("urn:age", Access::mutating()).unwrap();
    age.value_for(&broker, &e).unwrap().set(2).unwrap();
    broker.update().unwrap();

    let c = broker.concept("urn:C").unwrap();
    assert!(c.has_instance(&broker, "urn:e").unwrap());
    assert_eq!(c.instances(&broker).unwrap(), vec![e.clone()]);
    assert!(store.asserted_classes_of(e.iri()).unwrap().is_empty());

    let err = c.create_instance_from(&broker, &e).unwrap_err();
    assert!(matches!(
        err.as_integration(),
        Some(IntegrationError::AlreadyClassified { .. })
    ));

    // Declassifying retracts the assertion the membership was inferred from.
    c.declassify_instance(&broker, &e).unwrap();
    assert!(!e.is_a(&broker, &Iri::new("urn:C")).unwrap());
}

#[test]
fn object_values_must_belong_to_range_concept() {
    let store = schema();
    let broker = ModelStateBroker::new(store, BrokerConfig::default()).unwrap();
    let herd = broker.concept("urn:Herd").unwrap().create_instance(&broker).unwrap();
    let stray = broker.create_individual("urn:stray").unwrap();
    let cow = broker
        .concept("urn:C")
        .unwrap()
        .create_instance_with_id(&broker, "urn:cow")
        .unwrap();

    let member = broker.get_variable("urn:member", Access::mutating()).unwrap();
    let members = member.value_for(&broker, &herd).unwrap();
    let err = members.add(stray.iri().clone()).unwrap_err();
    assert!(matches!(
        err.as_integration(),
        Some(IntegrationError::RangeMismatch { .. })
    ));
    members.add(cow.iri().clone()).unwrap();
    broker.update().unwrap();

    let view = member.value_for(&broker, &herd).unwrap();
    assert_eq!(view.values().unwrap().len(), 1);
    assert_eq!(herd.values(&broker).unwrap().len(), 1);
}

#[test]
fn range_check_can_be_disabled() {
    let store = schema();
    let config = BrokerConfig {
        check_object_ranges: false,
        ..BrokerConfig::default()
    };
    let broker = ModelStateBroker::new(store, config).unwrap();
    let herd = broker.concept("urn:Herd").unwrap().create_instance(&broker).unwrap();
    let stray = broker.create_individual("urn:stray").unwrap();

    let member = broker.get_variable("urn:member", Access::mutating()).unwrap();
    member.value_for(&broker, &herd).unwrap().add(stray.iri().clone()).unwrap();
    broker.update().unwrap();

    // The reasoner now infers membership from the range.
    assert!(stray.is_a(&broker, &Iri::new("urn:C")).unwrap());
}

#[test]
fn brokers_sharing_identifiers_never_collide() {
    let store = schema();
    let config = BrokerConfig::default();
    let ids = Arc::new(IdentifierService::new(&config).unwrap());
    let a = ModelStateBroker::with_identifiers(store.clone(), config.clone(), Arc::clone(&ids)).unwrap();
    let b = ModelStateBroker::with_identifiers(store, config, Arc::clone(&ids)).unwrap();

    let first = a.concept("urn:C").unwrap().create_instance(&a).unwrap();
    let second = b.concept("urn:C").unwrap().create_instance(&b).unwrap();
    assert_ne!(first, second);
    assert_eq!(ids.peek("C"), 2);
}

#[test]
fn generation_links_can_be_saved_and_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let store = schema();
    let broker = ModelStateBroker::new(store.clone(), BrokerConfig::default()).unwrap();
    broker.update().unwrap();
    broker.update().unwrap();

    let path = broker.save_generation_link(dir.path()).unwrap();
    assert!(path.exists());

    let current = broker.generation().unwrap();
    assert_eq!(current, GenerationName::new("gen", 2));
    let link = GenerationChain::load_link(dir.path(), &current).unwrap();
    assert_eq!(link.previous.as_deref(), Some("gen-000001"));
    assert_eq!(link.next.as_deref(), Some("gen-000003"));

    let resumed = ModelStateBroker::new(store, BrokerConfig::default())
        .unwrap()
        .resume(GenerationName::parse(&link.current).unwrap())
        .unwrap();
    let report = resumed.update().unwrap();
    assert_eq!(report.generation, current);
    assert_eq!(resumed.generation().unwrap().step, 3);
}

#[test]
fn rejected_declassification_leaves_membership_and_values_intact() {
    let inner = schema();
    let store = Arc::new(FlakyStore {
        inner: Arc::clone(&inner),
        reject: AtomicBool::new(false),
    });
    let broker = ModelStateBroker::new(store.clone(), BrokerConfig::default()).unwrap();
    let c = broker.concept("urn:C").unwrap();
    let e1 = c.create_instance_with_id(&broker, "urn:e1").unwrap();
    let age = broker.get_variable("urn:age", Access::mutating()).unwrap();
    age.value_for(&broker, &e1).unwrap().set(7).unwrap();
    broker.update().unwrap();

    store.reject.store(true, Ordering::SeqCst);
    assert!(c.declassify_instance(&broker, &e1).is_err());
    assert_eq!(
        inner.asserted_classes_of(e1.iri()).unwrap(),
        BTreeSet::from([Iri::new("urn:C")])
    );
    assert_eq!(
        age.existing_value_for(&broker, &e1).unwrap().get().unwrap(),
        Term::from(7)
    );

    store.reject.store(false, Ordering::SeqCst);
    c.declassify_instance(&broker, &e1).unwrap();
    assert!(!c.has_instance(&broker, "urn:e1").unwrap());
    assert_eq!(inner.statement_count().unwrap(), 0);
}

#[test]
fn declassifying_right_after_creation_discards_creator_values() {
    let store = schema();
    let broker = ModelStateBroker::new(store.clone(), BrokerConfig::default()).unwrap();
    let c = Concept::from_schema(&broker, "urn:C")
        .unwrap()
        .with_creator(|broker, instance, props| {
            props[0].new_value_for(broker, instance)?.set(1)?;
            Ok(())
        });
    let c = broker.register_concept(c).unwrap();
    let herd = broker.concept("urn:Herd").unwrap().create_instance(&broker).unwrap();

    let calf = c.create_instance(&broker).unwrap();
    let member = broker.get_variable("urn:member", Access::mutating()).unwrap();
    member.value_for(&broker, &herd).unwrap().add(calf.iri().clone()).unwrap();

    c.declassify_instance(&broker, &calf).unwrap();
    let report = broker.update().unwrap();
    assert_eq!(report.writes, 0);
    assert_eq!(store.statement_count().unwrap(), 0);
    assert!(!calf.is_a(&broker, &Iri::new("urn:C")).unwrap());
}
