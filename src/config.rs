//! Classifier construction options.
//!
//! Limits bound the size of the lookup structures. They are fixed when the
//! classifier is created and cannot change per call.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

/// Default maximum number of installed rules
pub const DEFAULT_MAX_RULES: usize = 1024;

/// Hard upper bound on chunks in any phase (sizes the lookup scratch buffers)
pub const MAX_PHASE_CHUNKS: usize = 128;

/// Classifier limits and tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierOptions {
    /// Rule ids must be below this value
    pub max_rules: usize,
    /// Maximum number of phase-0 chunks (number lines)
    pub max_chunks: usize,
    /// Maximum number of phases, phase 0 included
    pub max_phases: usize,
    /// Maximum parents per chunk when planning merge phases
    pub max_fan_in: usize,
    /// Maximum cells of a single merge chunk
    pub max_chunk_cells: usize,
    /// Maximum rules one equivalence class (and one packet) may match
    pub max_matches: usize,
    /// Unused equivalence classes created up front in every phase-0 chunk
    pub prealloc_classes: usize,
    /// Merge equivalence classes that become identical after a delete
    pub remap_after_delete: bool,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            max_rules: DEFAULT_MAX_RULES,
            max_chunks: 64,
            max_phases: 6,
            max_fan_in: 3,
            max_chunk_cells: 1 << 22,
            max_matches: 64,
            prealloc_classes: 0,
            remap_after_delete: true,
        }
    }
}

impl ClassifierOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rules(mut self, max_rules: usize) -> Self {
        self.max_rules = max_rules;
        self
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    pub fn with_max_phases(mut self, max_phases: usize) -> Self {
        self.max_phases = max_phases;
        self
    }

    pub fn with_max_fan_in(mut self, max_fan_in: usize) -> Self {
        self.max_fan_in = max_fan_in;
        self
    }

    pub fn with_max_chunk_cells(mut self, max_chunk_cells: usize) -> Self {
        self.max_chunk_cells = max_chunk_cells;
        self
    }

    pub fn with_max_matches(mut self, max_matches: usize) -> Self {
        self.max_matches = max_matches;
        self
    }

    pub fn with_prealloc_classes(mut self, prealloc_classes: usize) -> Self {
        self.prealloc_classes = prealloc_classes;
        self
    }

    pub fn with_remap_after_delete(mut self, remap: bool) -> Self {
        self.remap_after_delete = remap;
        self
    }

    /// Bits per rule bitmap (forward and backward identity per rule)
    pub fn bitmap_bits(&self) -> usize {
        2 * self.max_rules
    }

    /// Check that the limits describe a usable classifier
    pub fn validate(&self) -> Result<()> {
        if self.max_rules == 0 || self.max_rules > u32::MAX as usize / 2 {
            return Err(ClassifierError::ConfigError(format!(
                "max_rules must be in 1..={}, got {}",
                u32::MAX / 2,
                self.max_rules
            )));
        }
        if self.max_chunks == 0 || self.max_chunks > MAX_PHASE_CHUNKS {
            return Err(ClassifierError::ConfigError(format!(
                "max_chunks must be in 1..={}, got {}",
                MAX_PHASE_CHUNKS, self.max_chunks
            )));
        }
        if self.max_phases < 2 {
            return Err(ClassifierError::ConfigError(format!(
                "max_phases must be at least 2, got {}",
                self.max_phases
            )));
        }
        if self.max_fan_in < 2 {
            return Err(ClassifierError::ConfigError(format!(
                "max_fan_in must be at least 2, got {}",
                self.max_fan_in
            )));
        }
        if self.max_chunk_cells == 0 || self.max_matches == 0 {
            return Err(ClassifierError::ConfigError(
                "max_chunk_cells and max_matches must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse options from JSON; missing keys take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = ClassifierOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.bitmap_bits(), 2 * DEFAULT_MAX_RULES);
        assert!(options.remap_after_delete);
    }

    #[test]
    fn test_builder() {
        let options = ClassifierOptions::new()
            .with_max_rules(16)
            .with_max_fan_in(2)
            .with_prealloc_classes(4)
            .with_remap_after_delete(false);
        assert_eq!(options.max_rules, 16);
        assert_eq!(options.max_fan_in, 2);
        assert_eq!(options.prealloc_classes, 4);
        assert!(!options.remap_after_delete);
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        assert!(ClassifierOptions::new().with_max_rules(0).validate().is_err());
        assert!(ClassifierOptions::new().with_max_fan_in(1).validate().is_err());
        assert!(ClassifierOptions::new().with_max_phases(1).validate().is_err());
        assert!(ClassifierOptions::new()
            .with_max_chunks(MAX_PHASE_CHUNKS + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let options =
            ClassifierOptions::from_json(r#"{ "max_rules": 32, "remap_after_delete": false }"#)
                .unwrap();
        assert_eq!(options.max_rules, 32);
        assert!(!options.remap_after_delete);
        assert_eq!(options.max_phases, ClassifierOptions::default().max_phases);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = ClassifierOptions::from_json(r#"{ "max_fan_in": 1 }"#).unwrap_err();
        assert!(matches!(err, ClassifierError::ConfigError(_)));

        let err = ClassifierOptions::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ClassifierError::JsonError(_)));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("rfc-options-{}.json", std::process::id()));
        fs::write(&path, r#"{ "max_rules": 128, "prealloc_classes": 16 }"#).unwrap();
        let options = ClassifierOptions::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(options.max_rules, 128);
        assert_eq!(options.prealloc_classes, 16);
    }

    #[test]
    fn test_from_file_missing() {
        let err = ClassifierOptions::from_file("/nonexistent/rfc-options.json").unwrap_err();
        assert!(matches!(err, ClassifierError::IoError(_)));
    }
}
