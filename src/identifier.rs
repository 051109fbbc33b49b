//! Identifier service.
//!
//! Generates collision-free identifiers for new individuals and temporary
//! stores. State is owned by an explicitly constructed [`IdentifierService`]
//! that is shared (behind an `Arc`) by whatever needs identifiers; all access
//! is serialized so concurrent steps never observe a reused counter value.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::iri::Iri;

static PREFIX_RE: OnceLock<Regex> = OnceLock::new();

fn prefix_regex() -> BrokerResult<&'static Regex> {
    if let Some(re) = PREFIX_RE.get() {
        return Ok(re);
    }
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$")
        .map_err(|e| BrokerError::internal(format!("identifier prefix regex: {e}")))?;
    Ok(PREFIX_RE.get_or_init(|| re))
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Identity of the current run, derived from host, process and start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub id: Uuid,
    pub host: String,
    pub process_id: u32,
    pub started_at: DateTime<Utc>,
    /// Hex blake3 digest of the identity inputs.
    pub digest: String,
}

impl RunIdentity {
    fn compute() -> Self {
        let host = host_name();
        let process_id = std::process::id();
        let started_at = Utc::now();

        let mut hasher = blake3::Hasher::new();
        hasher.update(host.as_bytes());
        hasher.update(&process_id.to_le_bytes());
        hasher.update(started_at.to_rfc3339().as_bytes());
        let hash = hasher.finalize();

        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, hash.as_bytes()),
            host,
            process_id,
            started_at,
            digest: hash.to_hex().to_string(),
        }
    }

    /// Returns a short form of the digest suitable for embedding in names.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.short(), self.host, self.process_id)
    }
}

#[derive(Debug, Default)]
struct IdentifierState {
    counters: HashMap<String, u64>,
    run: Option<RunIdentity>,
}

/// Process-wide identifier generator.
#[derive(Debug)]
pub struct IdentifierService {
    namespace: String,
    state: Mutex<IdentifierState>,
}

impl IdentifierService {
    /// Create a service from a validated configuration.
    pub fn new(config: &BrokerConfig) -> BrokerResult<Self> {
        config.validate()?;
        Ok(Self {
            namespace: config.namespace.clone(),
            state: Mutex::new(IdentifierState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, IdentifierState> {
        // Counters stay monotonic even if a holder panicked.
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns the namespace prepended to generated identifiers.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the next identifier for `prefix`.
    ///
    /// Counters start at 1 and are never reused within a run.
    pub fn next_id(&self, prefix: &str) -> BrokerResult<Iri> {
        let n = self.next_counter(prefix)?;
        Ok(Iri::new(format!("{}{prefix}_{n}", self.namespace)))
    }

    fn next_counter(&self, prefix: &str) -> BrokerResult<u64> {
        if !prefix_regex()?.is_match(prefix) {
            return Err(BrokerError::internal(format!(
                "invalid identifier prefix '{prefix}'"
            )));
        }
        let mut state = self.lock();
        let counter = state.counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    /// Returns the current value of the counter for `prefix` (0 if unused).
    #[must_use]
    pub fn peek(&self, prefix: &str) -> u64 {
        self.lock().counters.get(prefix).copied().unwrap_or(0)
    }

    /// Returns the run identity, computing it on first use.
    pub fn run_identity(&self) -> RunIdentity {
        let mut state = self.lock();
        state.run.get_or_insert_with(RunIdentity::compute).clone()
    }

    /// Returns a unique name for a temporary store.
    pub fn temporary_store_name(&self) -> BrokerResult<String> {
        let run = self.run_identity();
        let n = self.next_counter("tmp")?;
        Ok(format!("tmp_{}_{n}", run.short()))
    }

    /// Discards counters and run identity so the next request starts a fresh run.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.counters.clear();
        state.run = None;
        tracing::info!(target: "modelstate::identifier", "identifier service reset");
    }
}
