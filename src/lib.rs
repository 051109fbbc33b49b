//! # modelstate - typed property access with deferred commit
//!
//! `modelstate` mediates between independently written simulation behaviors
//! and a shared knowledge store. Behaviors never touch the store: they ask the
//! [`ModelStateBroker`] for a [`PropertyDescriptor`], obtain a [`Value`] bound
//! to an individual, read or mutate it, and the broker flushes every change in
//! one batch at the end of the processing step.
//!
//! ## Core Concepts
//!
//! - **PropertyDescriptor**: a property of the schema with fixed cardinality,
//!   value kind and access mode
//! - **Value**: the materialized binding of a descriptor to one individual;
//!   functional and non-functional values expose disjoint operations
//! - **Instance** / **Concept**: entity handles and the classes that create,
//!   classify, declassify and delete them
//! - **Generation**: one processing step; each individual/property pair is
//!   materialized at most once per generation
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use modelstate::store::{InMemoryStore, PropertyDeclaration};
//! use modelstate::{Access, BrokerConfig, ModelStateBroker, ScalarTag, Term};
//!
//! let store = InMemoryStore::new();
//! store.declare_property(PropertyDeclaration::data("urn:tags", false, Some(ScalarTag::String)))?;
//! let broker = ModelStateBroker::new(Arc::new(store), BrokerConfig::default())?;
//! let e2 = broker.create_individual("urn:e2")?;
//!
//! let tags = broker.get_variable("urn:tags", Access::mutating().by("labeler"))?;
//! let value = tags.value_for(&broker, &e2)?;
//! value.add("x")?;
//! value.add("y")?;
//! broker.update()?;
//!
//! let mut all = Vec::new();
//! tags.value_for(&broker, &e2)?.get_all(&mut all)?;
//! assert_eq!(all, vec![Term::from("x"), Term::from("y")]);
//! # Ok::<(), modelstate::BrokerError>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Core types
pub mod error;
pub mod iri;
pub mod literal;

// Ambient services
pub mod config;
pub mod generation;
pub mod identifier;

// Store collaborator
pub mod store;

// Property access layer
pub mod broker;
pub mod concept;
pub mod descriptor;
pub mod instance;
pub mod value;

// Re-export primary types at crate root for convenience
pub use broker::{CommitReport, ModelStateBroker};
pub use concept::{Concept, Creator, Query};
pub use config::BrokerConfig;
pub use descriptor::{Access, AccessMode, Cardinality, DescriptorBuilder, PropertyDescriptor, ValueKind};
pub use error::{BrokerError, BrokerResult, ExpectedCardinality, IntegrationError, Origin, StoreError};
pub use generation::{GenerationChain, GenerationLink, GenerationName};
pub use identifier::{IdentifierService, RunIdentity};
pub use instance::Instance;
pub use iri::Iri;
pub use literal::{Literal, ScalarTag, Term, Tolerance};
pub use value::{FunctionalState, Value};
