//! Saved-generation naming and linkage.
//!
//! A saved generation is named by a fixed prefix and a step index
//! (`gen-000042`). Each generation has a link record naming its predecessor
//! and successor so that a run can be resumed by walking the chain. Only the
//! linkage is handled here; the store contents are written by the I/O layer.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, BrokerResult};

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_regex() -> BrokerResult<&'static Regex> {
    if let Some(re) = NAME_RE.get() {
        return Ok(re);
    }
    let re = Regex::new(r"^([A-Za-z0-9_]+)-(\d+)$")
        .map_err(|e| BrokerError::internal(format!("generation name regex: {e}")))?;
    Ok(NAME_RE.get_or_init(|| re))
}

/// Name of one saved generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationName {
    pub prefix: String,
    pub step: u64,
}

impl GenerationName {
    #[must_use]
    pub fn new(prefix: impl Into<String>, step: u64) -> Self {
        Self {
            prefix: prefix.into(),
            step,
        }
    }

    /// Parses a name of the form `{prefix}-{step}`.
    pub fn parse(name: &str) -> BrokerResult<Self> {
        let caps = name_regex()?
            .captures(name)
            .ok_or_else(|| BrokerError::internal(format!("malformed generation name '{name}'")))?;
        let step = caps[2]
            .parse()
            .map_err(|e| BrokerError::internal(format!("generation step in '{name}': {e}")))?;
        Ok(Self::new(&caps[1], step))
    }

    #[must_use]
    pub fn next(&self) -> Self {
        Self::new(self.prefix.clone(), self.step + 1)
    }

    #[must_use]
    pub fn previous(&self) -> Option<Self> {
        self.step
            .checked_sub(1)
            .map(|step| Self::new(self.prefix.clone(), step))
    }
}

impl fmt::Display for GenerationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:06}", self.prefix, self.step)
    }
}

/// Link record stored alongside each saved generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationLink {
    pub previous: Option<String>,
    pub current: String,
    pub next: Option<String>,
}

/// Tracks the current generation of a run.
#[derive(Debug, Clone)]
pub struct GenerationChain {
    current: GenerationName,
}

impl GenerationChain {
    /// Starts a chain at step 0.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::resume(GenerationName::new(prefix, 0))
    }

    /// Resumes a chain at an existing generation.
    #[must_use]
    pub fn resume(current: GenerationName) -> Self {
        Self { current }
    }

    #[must_use]
    pub const fn current(&self) -> &GenerationName {
        &self.current
    }

    /// Returns the link for the current generation. Step 0 has no predecessor.
    #[must_use]
    pub fn link(&self) -> GenerationLink {
        GenerationLink {
            previous: self.current.previous().map(|p| p.to_string()),
            current: self.current.to_string(),
            next: Some(self.current.next().to_string()),
        }
    }

    /// Moves to the next generation and returns the link of the one left behind.
    pub fn advance(&mut self) -> GenerationLink {
        let link = self.link();
        self.current = self.current.next();
        tracing::info!(target: "modelstate::generation", generation = %self.current, "advanced generation");
        link
    }

    /// Writes the link file for the current generation into `dir`.
    pub fn save_link(&self, dir: &Path) -> BrokerResult<PathBuf> {
        let link = self.link();
        let path = link_path(dir, &link.current);
        let json = serde_json::to_vec_pretty(&link)
            .map_err(|e| BrokerError::internal(format!("serialize generation link: {e}")))?;
        fs::write(&path, json).map_err(|e| {
            BrokerError::internal(format!("write generation link {}: {e}", path.display()))
        })?;
        Ok(path)
    }

    /// Reads the link file of generation `name` from `dir`.
    pub fn load_link(dir: &Path, name: &GenerationName) -> BrokerResult<GenerationLink> {
        let path = link_path(dir, &name.to_string());
        let bytes = fs::read(&path).map_err(|e| {
            BrokerError::internal(format!("read generation link {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BrokerError::internal(format!("parse generation link: {e}")))
    }
}

fn link_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.link.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_display_and_parse() {
        let name = GenerationName::new("gen", 42);
        assert_eq!(name.to_string(), "gen-000042");
        assert_eq!(GenerationName::parse("gen-000042").unwrap(), name);
        assert!(GenerationName::parse("gen42").is_err());
        assert!(GenerationName::parse("-1").is_err());
    }

    #[test]
    fn test_first_generation_has_no_previous() {
        let chain = GenerationChain::new("gen");
        let link = chain.link();
        assert_eq!(link.previous, None);
        assert_eq!(link.current, "gen-000000");
        assert_eq!(link.next.as_deref(), Some("gen-000001"));
    }

    #[test]
    fn test_advance_links_steps() {
        let mut chain = GenerationChain::new("gen");
        let first = chain.advance();
        assert_eq!(first.current, "gen-000000");
        let second = chain.link();
        assert_eq!(second.previous.as_deref(), Some("gen-000000"));
        assert_eq!(second.current, "gen-000001");
    }

    #[test]
    fn test_link_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut chain = GenerationChain::resume(GenerationName::new("run", 7));
        chain.advance();
        let path = chain.save_link(dir.path()).unwrap();
        assert!(path.ends_with("run-000008.link.json"));

        let loaded = GenerationChain::load_link(dir.path(), chain.current()).unwrap();
        assert_eq!(loaded, chain.link());
        assert_eq!(loaded.previous.as_deref(), Some("run-000007"));
    }

    #[test]
    fn test_load_missing_link_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = GenerationChain::load_link(dir.path(), &GenerationName::new("gen", 1)).unwrap_err();
        assert!(err.is_internal());
    }
}
