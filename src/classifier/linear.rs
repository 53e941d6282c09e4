use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::Classifier;
use crate::config::ClassifierOptions;
use crate::error::{ClassifierError, Result};
use crate::rule::Rule;
use crate::types::{PacketMeta, RuleId};

/// Classifier that evaluates every rule against every packet.
///
/// Lookup cost grows with the rule count, but there is no precomputation.
/// Enforces the same rule-id capacity and structural checks as
/// [`RfcClassifier`](super::RfcClassifier), but not its table limits. It
/// also accepts ranges and sets that do not split into per-chunk spans,
/// which `RfcClassifier` rejects.
#[derive(Debug, Default)]
pub struct LinearClassifier {
    options: ClassifierOptions,
    rules: RwLock<BTreeMap<RuleId, Rule>>,
}

impl LinearClassifier {
    pub fn new(options: ClassifierOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            rules: RwLock::new(BTreeMap::new()),
        })
    }

    fn check_rule(&self, rule: &Rule) -> Result<()> {
        if rule.uid as usize >= self.options.max_rules {
            return Err(ClassifierError::RuleCapacity {
                uid: rule.uid,
                max: self.options.max_rules,
            });
        }
        rule.validate()
    }
}

impl Classifier for LinearClassifier {
    fn check_rules(&self, rules: &[Rule]) -> Result<()> {
        rules.iter().try_for_each(|rule| self.check_rule(rule))
    }

    fn add_rules(&self, rules: &[Rule]) -> Result<()> {
        let mut installed = self.rules.write();
        let mut next = installed.clone();
        for rule in rules {
            self.check_rule(rule)?;
            if next.insert(rule.uid, rule.clone()).is_some() {
                return Err(ClassifierError::DuplicateRule(rule.uid));
            }
        }
        *installed = next;
        Ok(())
    }

    fn del_rules(&self, rules: &[Rule]) -> Result<()> {
        let mut installed = self.rules.write();
        let mut next = installed.clone();
        for rule in rules {
            next.remove(&rule.uid)
                .ok_or(ClassifierError::UnknownRule(rule.uid))?;
        }
        *installed = next;
        Ok(())
    }

    fn classify_into(&self, packet: &PacketMeta<'_>, out: &mut Vec<RuleId>) -> usize {
        out.clear();
        out.extend(
            self.rules
                .read()
                .values()
                .filter(|rule| rule.matches(packet))
                .map(|rule| rule.uid),
        );
        out.len()
    }

    fn rule_count(&self) -> usize {
        self.rules.read().len()
    }
}
