//! Entity handles.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::broker::ModelStateBroker;
use crate::error::BrokerResult;
use crate::iri::Iri;
use crate::value::Value;

/// Handle to an individual known to the store.
///
/// Handles are obtained from [`ModelStateBroker::resolve`] or from a
/// [`Concept`](crate::Concept); holding one does not keep the individual
/// alive. Concept memberships and materialized values are looked up on
/// demand, so they always reflect the current generation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instance {
    iri: Iri,
}

impl Instance {
    pub(crate) const fn new(iri: Iri) -> Self {
        Self { iri }
    }

    #[must_use]
    pub const fn iri(&self) -> &Iri {
        &self.iri
    }

    /// Every concept this individual belongs to, inferred ones included.
    pub fn concepts(&self, broker: &ModelStateBroker) -> BrokerResult<BTreeSet<Iri>> {
        Ok(broker.store().classes_of(&self.iri)?)
    }

    pub fn is_a(&self, broker: &ModelStateBroker, concept: &Iri) -> BrokerResult<bool> {
        Ok(self.concepts(broker)?.contains(concept))
    }

    /// Values materialized for this individual in the current generation.
    pub fn values(&self, broker: &ModelStateBroker) -> BrokerResult<Vec<Value>> {
        broker.materialized_for(self)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iri)
    }
}

impl AsRef<Iri> for Instance {
    fn as_ref(&self) -> &Iri {
        &self.iri
    }
}
