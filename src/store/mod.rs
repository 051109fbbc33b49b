//! Store collaborator: contract, reasoner and in-memory backend.

pub mod memory;
pub mod reasoner;
mod traits;

pub use memory::InMemoryStore;
pub use reasoner::{AssertedOnly, FactView, Reasoner, StructuralReasoner};
pub use traits::{
    KnowledgeStore, PropertyDeclaration, PropertyKind, Range, Statement, StoreChange,
};
