//! The model-state broker.
//!
//! [`ModelStateBroker`] is the single point of contact between behaviors and
//! the knowledge store. It hands out property descriptors, materializes
//! [`Value`]s through a generation-scoped registry, and flushes every
//! registered value in one batch when the generation ends.
//!
//! ```
//! use std::sync::Arc;
//! use modelstate::store::{InMemoryStore, PropertyDeclaration};
//! use modelstate::{Access, BrokerConfig, ModelStateBroker, ScalarTag, Term};
//!
//! let store = InMemoryStore::new();
//! store.declare_property(PropertyDeclaration::data("urn:age", true, Some(ScalarTag::Integer)))?;
//! let broker = ModelStateBroker::new(Arc::new(store), BrokerConfig::default())?;
//!
//! let cow = broker.create_individual("urn:cow1")?;
//! let age = broker.get_variable("urn:age", Access::mutating())?;
//! age.new_value_for(&broker, &cow)?.set(3)?;
//! broker.update()?;
//!
//! assert_eq!(age.existing_value_for(&broker, &cow)?.get()?, Term::from(3));
//! # Ok::<(), modelstate::BrokerError>(())
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};

use crate::concept::Concept;
use crate::config::BrokerConfig;
use crate::descriptor::{Access, DescriptorBuilder, PropertyDescriptor};
use crate::error::{BrokerError, BrokerResult, ExpectedCardinality, IntegrationError};
use crate::generation::{GenerationChain, GenerationLink, GenerationName};
use crate::identifier::IdentifierService;
use crate::instance::Instance;
use crate::iri::Iri;
use crate::literal::{ScalarTag, Term, Tolerance};
use crate::store::{KnowledgeStore, PropertyDeclaration, PropertyKind, StoreChange};
use crate::value::Value;

fn lock_err(context: &'static str) -> BrokerError {
    BrokerError::internal(format!("broker lock poisoned: {context}"))
}

/// What the caller asserts about the presence of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expectation {
    Any,
    Existing,
    New,
}

/// Summary of one commit pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    /// Generation that was committed.
    pub generation: GenerationName,
    /// Values that produced at least one change.
    pub committed: usize,
    /// Values that were registered but unchanged.
    pub unchanged: usize,
    /// Store changes applied.
    pub writes: usize,
}

type Key = (Iri, Iri);

/// Values materialized in the current generation, in registration order.
#[derive(Default)]
struct Registry {
    entries: Vec<(Key, Value)>,
    index: HashMap<Key, usize>,
}

impl Registry {
    fn get(&self, key: &Key) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    fn insert(&mut self, key: Key, value: Value) {
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
    }

    fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Drops every entry for which `keep` returns false; returns how many.
    fn retain(&mut self, mut keep: impl FnMut(&Key) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| keep(k));
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, (k, _))| (k.clone(), i))
            .collect();
        before - self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Façade over the knowledge store.
pub struct ModelStateBroker {
    store: Arc<dyn KnowledgeStore>,
    ids: Arc<IdentifierService>,
    config: BrokerConfig,
    registry: Mutex<Registry>,
    concepts: RwLock<HashMap<Iri, Arc<Concept>>>,
    chain: Mutex<GenerationChain>,
}

impl fmt::Debug for ModelStateBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelStateBroker")
            .field("config", &self.config)
            .field("registered", &self.registered_count().ok())
            .finish_non_exhaustive()
    }
}

impl ModelStateBroker {
    /// Create a broker with its own identifier service.
    pub fn new(store: Arc<dyn KnowledgeStore>, config: BrokerConfig) -> BrokerResult<Self> {
        let ids = Arc::new(IdentifierService::new(&config)?);
        Self::with_identifiers(store, config, ids)
    }

    /// Create a broker sharing an existing identifier service.
    pub fn with_identifiers(
        store: Arc<dyn KnowledgeStore>,
        config: BrokerConfig,
        ids: Arc<IdentifierService>,
    ) -> BrokerResult<Self> {
        config.validate()?;
        let chain = GenerationChain::new(config.generation_prefix.clone());
        Ok(Self {
            store,
            ids,
            config,
            registry: Mutex::new(Registry::default()),
            concepts: RwLock::new(HashMap::new()),
            chain: Mutex::new(chain),
        })
    }

    /// Continue numbering generations from a saved one.
    pub fn resume(self, generation: GenerationName) -> BrokerResult<Self> {
        if generation.prefix != self.config.generation_prefix {
            return Err(BrokerError::internal(format!(
                "cannot resume '{generation}' with generation prefix '{}'",
                self.config.generation_prefix
            )));
        }
        *self.chain.lock().map_err(|_| lock_err("resume"))? = GenerationChain::resume(generation);
        Ok(self)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    #[must_use]
    pub const fn identifiers(&self) -> &Arc<IdentifierService> {
        &self.ids
    }

    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Name of the generation currently being processed.
    pub fn generation(&self) -> BrokerResult<GenerationName> {
        Ok(self.chain.lock().map_err(|_| lock_err("generation"))?.current().clone())
    }

    /// Link record of the current generation.
    pub fn generation_link(&self) -> BrokerResult<GenerationLink> {
        Ok(self.chain.lock().map_err(|_| lock_err("generation_link"))?.link())
    }

    /// Writes the link file of the current generation into `dir`.
    pub fn save_generation_link(&self, dir: &Path) -> BrokerResult<PathBuf> {
        self.chain.lock().map_err(|_| lock_err("save_generation_link"))?.save_link(dir)
    }

    fn advance(&self) -> BrokerResult<GenerationName> {
        let mut chain = self.chain.lock().map_err(|_| lock_err("advance"))?;
        let left = chain.current().clone();
        chain.advance();
        Ok(left)
    }

    fn lock_registry(&self) -> BrokerResult<MutexGuard<'_, Registry>> {
        self.registry.lock().map_err(|_| lock_err("registry"))
    }

    // Entities.

    /// Resolves an identifier to an existing individual.
    pub fn resolve(&self, id: impl Into<Iri>) -> BrokerResult<Instance> {
        let id = id.into();
        match self.store.resolve(&id)? {
            Some(iri) => Ok(Instance::new(iri)),
            None => Err(IntegrationError::NoSuchIndividual { individual: id }.into()),
        }
    }

    /// Creates an unclassified individual.
    pub fn create_individual(&self, id: impl Into<Iri>) -> BrokerResult<Instance> {
        let id = id.into();
        self.store.create_individual(&id)?;
        tracing::debug!(target: "modelstate::broker", individual = %id, "created individual");
        Ok(Instance::new(id))
    }

    // Descriptors.

    fn declaration(&self, property: &Iri) -> BrokerResult<PropertyDeclaration> {
        self.store
            .property_declaration(property)?
            .ok_or_else(|| IntegrationError::NoSuchProperty { property: property.clone() }.into())
    }

    fn require_kind(decl: &PropertyDeclaration, expected: PropertyKind) -> BrokerResult<()> {
        if decl.kind == expected {
            Ok(())
        } else {
            Err(IntegrationError::KindMismatch {
                property: decl.property.clone(),
                expected,
            }
            .into())
        }
    }

    /// Descriptor for a declared property, shaped entirely by the schema.
    pub fn get_variable(&self, name: impl Into<Iri>, access: Access) -> BrokerResult<Arc<PropertyDescriptor>> {
        let decl = self.declaration(&name.into())?;
        let builder = PropertyDescriptor::builder(decl.property.clone());
        let builder = match decl.kind {
            PropertyKind::Data => builder.data(None),
            PropertyKind::Object => builder.object(decl.range_concept().cloned()),
        };
        self.finish(builder, &decl, access)
    }

    /// Descriptor for a data property with an explicit tag and tolerance.
    pub fn get_data_variable(
        &self,
        name: impl Into<Iri>,
        tag: Option<ScalarTag>,
        tolerance: Option<Tolerance>,
        access: Access,
    ) -> BrokerResult<Arc<PropertyDescriptor>> {
        let decl = self.declaration(&name.into())?;
        Self::require_kind(&decl, PropertyKind::Data)?;
        let builder = PropertyDescriptor::builder(decl.property.clone())
            .data(tag)
            .tolerance(tolerance);
        self.finish(builder, &decl, access)
    }

    /// Descriptor for an object property, optionally narrowing its range.
    pub fn get_object_variable(
        &self,
        name: impl Into<Iri>,
        range: Option<Iri>,
        access: Access,
    ) -> BrokerResult<Arc<PropertyDescriptor>> {
        let decl = self.declaration(&name.into())?;
        Self::require_kind(&decl, PropertyKind::Object)?;
        let range = range.or_else(|| decl.range_concept().cloned());
        self.finish(PropertyDescriptor::builder(decl.property.clone()).object(range), &decl, access)
    }

    fn finish(
        &self,
        builder: DescriptorBuilder,
        decl: &PropertyDeclaration,
        access: Access,
    ) -> BrokerResult<Arc<PropertyDescriptor>> {
        let builder = if decl.functional {
            builder.functional()
        } else {
            builder.non_functional()
        };
        let descriptor = builder
            .access(access)
            .strict_tolerance(self.config.strict_tolerance)
            .build(self.store.as_ref())?;
        Ok(Arc::new(descriptor))
    }

    // Registry.

    /// Returns the value of `descriptor` for `instance`, registering it on
    /// first use in this generation.
    pub(crate) fn materialize(
        &self,
        descriptor: &Arc<PropertyDescriptor>,
        instance: &Instance,
        expectation: Expectation,
    ) -> BrokerResult<Value> {
        let key = (instance.iri().clone(), descriptor.property().clone());
        let mut registry = self.lock_registry()?;

        if let Some(existing) = registry.get(&key) {
            Self::check_compatible(existing.var(), descriptor)?;
            let value = existing.view(Arc::clone(descriptor))?;
            drop(registry);
            let present = value.n_elements()? > 0;
            Self::check_expectation(descriptor, instance.iri(), expectation, present)?;
            return Ok(value);
        }

        let Some(individual) = self.store.resolve(instance.iri())? else {
            return Err(IntegrationError::NoSuchIndividual {
                individual: instance.iri().clone(),
            }
            .into());
        };
        let terms = self.stored_terms(descriptor, &individual)?;
        if descriptor.is_functional() && terms.len() > 1 {
            return Err(IntegrationError::BrokenUniquenessAssumption {
                property: descriptor.property().clone(),
                individual,
                count: terms.len(),
            }
            .into());
        }
        Self::check_expectation(descriptor, &individual, expectation, !terms.is_empty())?;

        let value = Value::load(
            Arc::clone(descriptor),
            individual,
            terms,
            Arc::clone(&self.store),
            self.config.check_object_ranges,
        );
        tracing::debug!(
            target: "modelstate::broker",
            value = %value,
            registered = registry.len() + 1,
            "materialized value"
        );
        registry.insert(key, value.clone());
        Ok(value)
    }

    fn stored_terms(&self, descriptor: &PropertyDescriptor, individual: &Iri) -> BrokerResult<BTreeSet<Term>> {
        let property = descriptor.property();
        Ok(if descriptor.is_data_kind() {
            self.store
                .data_values_of(individual, property)?
                .into_iter()
                .map(Term::Literal)
                .collect()
        } else {
            self.store
                .object_values_of(individual, property)?
                .into_iter()
                .map(Term::Individual)
                .collect()
        })
    }

    fn check_compatible(registered: &PropertyDescriptor, requested: &PropertyDescriptor) -> BrokerResult<()> {
        if registered.cardinality() != requested.cardinality() {
            let expected = if registered.is_functional() {
                ExpectedCardinality::Functional
            } else {
                ExpectedCardinality::NonFunctional
            };
            return Err(IntegrationError::WrongCardinality {
                property: requested.property().clone(),
                operation: "materialize",
                expected,
                origin: requested.origin(),
            }
            .into());
        }
        let kind = registered.kind().property_kind();
        if kind != requested.kind().property_kind() {
            return Err(IntegrationError::KindMismatch {
                property: requested.property().clone(),
                expected: kind,
            }
            .into());
        }
        Ok(())
    }

    fn check_expectation(
        descriptor: &PropertyDescriptor,
        individual: &Iri,
        expectation: Expectation,
        present: bool,
    ) -> BrokerResult<()> {
        match (expectation, present) {
            (Expectation::Existing, false) => Err(IntegrationError::MissingProperty {
                property: descriptor.property().clone(),
                individual: individual.clone(),
                origin: descriptor.origin(),
            }
            .into()),
            (Expectation::New, true) => Err(IntegrationError::AlreadyHasProperty {
                property: descriptor.property().clone(),
                individual: individual.clone(),
                origin: descriptor.origin(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Whether `instance` carries a value, without materializing one.
    pub(crate) fn has_value(&self, descriptor: &PropertyDescriptor, instance: &Instance) -> BrokerResult<bool> {
        let key = (instance.iri().clone(), descriptor.property().clone());
        let registered = self.lock_registry()?.get(&key).cloned();
        if let Some(value) = registered {
            return Ok(value.n_elements()? > 0);
        }
        let individual = self.resolve(instance.iri().clone())?;
        Ok(!self.stored_terms(descriptor, individual.iri())?.is_empty())
    }

    /// Values registered for `instance` in this generation.
    pub fn materialized_for(&self, instance: &Instance) -> BrokerResult<Vec<Value>> {
        let registry = self.lock_registry()?;
        Ok(registry
            .entries
            .iter()
            .filter(|((individual, _), _)| individual == instance.iri())
            .map(|(_, v)| v.clone())
            .collect())
    }

    /// Number of values materialized since the last commit or reset.
    pub fn registered_count(&self) -> BrokerResult<usize> {
        Ok(self.lock_registry()?.len())
    }

    /// Keys of every registered value, committed or not.
    pub(crate) fn registered_keys(&self) -> BrokerResult<Vec<(Iri, Iri)>> {
        Ok(self.lock_registry()?.entries.iter().map(|(k, _)| k.clone()).collect())
    }

    /// Drops registered values whose key is in `keys`.
    pub(crate) fn evict(&self, keys: &BTreeSet<(Iri, Iri)>) -> BrokerResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let evicted = self.lock_registry()?.retain(|k| !keys.contains(k));
        tracing::debug!(target: "modelstate::broker", evicted, "evicted values");
        Ok(evicted)
    }

    /// Drops every registered value of `individual`.
    pub(crate) fn evict_individual(&self, individual: &Iri) -> BrokerResult<usize> {
        let evicted = self.lock_registry()?.retain(|(i, _)| i != individual);
        tracing::debug!(target: "modelstate::broker", %individual, evicted, "evicted values");
        Ok(evicted)
    }

    /// Removes references to `target` from registered values selected by `select`.
    pub(crate) fn forget_references(
        &self,
        target: &Iri,
        mut select: impl FnMut(&(Iri, Iri)) -> bool,
    ) -> BrokerResult<()> {
        let registry = self.lock_registry()?;
        for (key, value) in &registry.entries {
            if value.var().is_object_kind() && select(key) {
                value.forget_reference(target)?;
            }
        }
        Ok(())
    }

    // Lifecycle.

    /// Commits every registered value and starts the next generation.
    ///
    /// Changes are collected in registration order and applied as one batch.
    /// If the batch fails nothing is marked committed and the registry is
    /// kept, so the caller can [`reset`](Self::reset) or abort.
    pub fn update(&self) -> BrokerResult<CommitReport> {
        let mut registry = self.lock_registry()?;

        let mut batch: Vec<StoreChange> = Vec::new();
        let mut committed = 0;
        let mut unchanged = 0;
        for value in registry.values() {
            let changes = value.pending_changes()?;
            if changes.is_empty() {
                unchanged += 1;
            } else {
                committed += 1;
                batch.extend(changes);
            }
        }

        let writes = if batch.is_empty() {
            0
        } else {
            self.store.apply(&batch).map_err(|e| {
                tracing::error!(
                    target: "modelstate::broker",
                    error = %e,
                    changes = batch.len(),
                    "commit batch rejected by store"
                );
                e
            })?
        };

        for value in registry.values() {
            value.mark_committed()?;
        }
        registry.clear();
        drop(registry);

        let generation = self.advance()?;
        tracing::info!(
            target: "modelstate::broker",
            %generation,
            committed,
            unchanged,
            writes,
            "committed generation"
        );
        Ok(CommitReport {
            generation,
            committed,
            unchanged,
            writes,
        })
    }

    /// Discards every registered value without committing.
    pub fn reset(&self) -> BrokerResult<()> {
        let discarded = {
            let mut registry = self.lock_registry()?;
            let n = registry.len();
            registry.clear();
            n
        };
        let generation = self.advance()?;
        tracing::info!(target: "modelstate::broker", %generation, discarded, "discarded generation");
        Ok(())
    }

    // Concepts.

    /// Registers a concept, replacing any previous registration of the same IRI.
    pub fn register_concept(&self, concept: Concept) -> BrokerResult<Arc<Concept>> {
        let concept = Arc::new(concept);
        self.concepts
            .write()
            .map_err(|_| lock_err("register_concept"))?
            .insert(concept.iri().clone(), Arc::clone(&concept));
        Ok(concept)
    }

    /// The registered concept, or one built from the schema.
    pub fn concept(&self, iri: impl Into<Iri>) -> BrokerResult<Arc<Concept>> {
        let iri = iri.into();
        if let Some(concept) = self.concepts.read().map_err(|_| lock_err("concept"))?.get(&iri) {
            return Ok(Arc::clone(concept));
        }
        let built = Arc::new(Concept::from_schema(self, iri.clone())?);
        let mut concepts = self.concepts.write().map_err(|_| lock_err("concept"))?;
        Ok(Arc::clone(concepts.entry(iri).or_insert(built)))
    }
}
