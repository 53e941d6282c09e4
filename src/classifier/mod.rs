//! Classifier front ends.

mod linear;
mod rfc;

pub use linear::LinearClassifier;
pub use rfc::RfcClassifier;

use crate::error::Result;
use crate::rule::Rule;
use crate::types::{PacketMeta, RuleId};

/// A packet classifier with a mutable rule set.
///
/// Implementations are shared between the packet path and the rule
/// administration path, so every method takes `&self`.
pub trait Classifier: Send + Sync {
    /// Check that every rule would be accepted, without installing any
    fn check_rules(&self, rules: &[Rule]) -> Result<()>;

    /// Install a batch of rules; on error none of the batch is installed
    fn add_rules(&self, rules: &[Rule]) -> Result<()>;

    /// Remove a batch of rules by id; on error none of the batch is removed
    fn del_rules(&self, rules: &[Rule]) -> Result<()>;

    /// Write the ids of the matching rules to `out` in ascending order.
    ///
    /// `out` is cleared first. Returns the number of matches.
    fn classify_into(&self, packet: &PacketMeta<'_>, out: &mut Vec<RuleId>) -> usize;

    /// Ids of the matching rules in ascending order
    fn classify(&self, packet: &PacketMeta<'_>) -> Vec<RuleId> {
        let mut out = Vec::new();
        self.classify_into(packet, &mut out);
        out
    }

    /// Number of installed rules
    fn rule_count(&self) -> usize;
}
