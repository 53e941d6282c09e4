use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::Classifier;
use crate::config::ClassifierOptions;
use crate::engine::{Engine, RfcStats};
use crate::error::Result;
use crate::rule::Rule;
use crate::types::{PacketMeta, RuleId};

/// Recursive Flow Classification classifier.
///
/// Lookups take a shared lock and cost one table read per chunk. Updates
/// are applied to a private copy of the tables which is swapped in once the
/// whole batch succeeded, so lookups never see a half-applied batch.
/// Every update, including a single-rule delete, copies all chunk tables
/// and class bitmaps first, so its time and memory grow with the size of
/// the whole structure.
///
/// # Example
///
/// ```rust
/// use rfc_classifier::{Classifier, ClassifierOptions, FieldLocation, FieldRef, Filter};
/// use rfc_classifier::{PacketMeta, RfcClassifier, Rule};
///
/// let classifier = RfcClassifier::new(ClassifierOptions::new().with_max_rules(16)).unwrap();
/// let proto = FieldLocation::new(FieldRef::NETWORK, 9);
/// classifier
///     .add_rules(&[Rule::new(1).with_filter(Filter::u8(proto, 6))])
///     .unwrap();
///
/// let mut header = [0u8; 20];
/// header[9] = 6;
/// let packet = PacketMeta::new(&header).with_layer(FieldRef::NETWORK, 0);
/// assert_eq!(classifier.classify(&packet), vec![1]);
/// ```
pub struct RfcClassifier {
    options: ClassifierOptions,
    engine: RwLock<Engine>,
    update_lock: Mutex<()>,
}

impl RfcClassifier {
    /// Create an empty classifier
    pub fn new(options: ClassifierOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::from_engine(Engine::new(options.clone()), options))
    }

    /// Create a classifier and precompute its tables from a rule set
    pub fn with_rules(options: ClassifierOptions, rules: &[Rule]) -> Result<Self> {
        options.validate()?;
        let engine = Engine::build(&options, rules)?;
        Ok(Self::from_engine(engine, options))
    }

    fn from_engine(engine: Engine, options: ClassifierOptions) -> Self {
        Self {
            options,
            engine: RwLock::new(engine),
            update_lock: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    pub fn stats(&self) -> RfcStats {
        self.engine.read().stats()
    }

    /// Run `apply` against a copy of the engine and publish the result
    fn update<F>(&self, operation: &'static str, batch: usize, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Engine) -> Result<()>,
    {
        let _guard = self.update_lock.lock();
        let started = Instant::now();

        let mut next = self.engine.read().clone();
        if let Err(e) = apply(&mut next) {
            warn!(operation, batch, error = %e, "rule update rejected");
            return Err(e);
        }
        let rules = next.rule_count();
        *self.engine.write() = next;

        debug!(
            operation,
            batch,
            rules,
            elapsed_us = started.elapsed().as_micros() as u64,
            "rule update applied"
        );
        Ok(())
    }
}

impl Default for RfcClassifier {
    fn default() -> Self {
        let options = ClassifierOptions::default();
        Self::from_engine(Engine::new(options.clone()), options)
    }
}

impl std::fmt::Debug for RfcClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RfcClassifier")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Classifier for RfcClassifier {
    fn check_rules(&self, rules: &[Rule]) -> Result<()> {
        let engine = self.engine.read();
        for rule in rules {
            engine.check_rule(rule)?;
        }
        Ok(())
    }

    fn add_rules(&self, rules: &[Rule]) -> Result<()> {
        self.update("add", rules.len(), |engine| {
            if engine.is_empty() {
                *engine = Engine::build(&self.options, rules)?;
                return Ok(());
            }
            for rule in rules {
                engine.add_rule(rule)?;
            }
            Ok(())
        })
    }

    fn del_rules(&self, rules: &[Rule]) -> Result<()> {
        self.update("delete", rules.len(), |engine| {
            for rule in rules {
                engine.delete_rule(rule.uid)?;
            }
            Ok(())
        })
    }

    fn classify_into(&self, packet: &PacketMeta<'_>, out: &mut Vec<RuleId>) -> usize {
        out.clear();
        out.extend_from_slice(self.engine.read().lookup(packet));
        out.len()
    }

    fn rule_count(&self) -> usize {
        self.engine.read().rule_count()
    }
}
