//! Final rule map: last-phase class id to the ordered list of rule ids.

use super::bitmap::Bitmap;
use super::eqclass::{ClassId, EqTable};
use crate::error::{ClassifierError, Result};
use crate::types::RuleId;

#[derive(Debug, Clone, Default)]
pub(crate) struct RuleMap {
    entries: Vec<Vec<RuleId>>,
}

impl RuleMap {
    /// Expand every live class of the final chunk
    pub fn build(table: &EqTable, max_matches: usize) -> Result<Self> {
        let mut entries = vec![Vec::new(); table.max_id()];
        for id in table.live_ids() {
            entries[id as usize] = expand(table.bitmap(id), max_matches)?;
        }
        Ok(Self { entries })
    }

    /// Matching rules of a final class; empty for unpopulated ids
    #[inline]
    pub fn get(&self, id: ClassId) -> &[RuleId] {
        self.entries.get(id as usize).map_or(&[], Vec::as_slice)
    }

    /// Drop a rule from every entry that lists it
    pub fn remove_rule(&mut self, uid: RuleId) {
        for entry in &mut self.entries {
            if let Ok(pos) = entry.binary_search(&uid) {
                entry.remove(pos);
            }
        }
    }
}

/// Rule ids of a bitmap in ascending order, forward and backward bits of a
/// rule reported once
pub(crate) fn expand(bitmap: &Bitmap, max_matches: usize) -> Result<Vec<RuleId>> {
    let mut rules: Vec<RuleId> = Vec::new();
    for bit in bitmap.ones() {
        let uid = (bit / 2) as RuleId;
        if rules.last() != Some(&uid) {
            rules.push(uid);
        }
    }
    if rules.len() > max_matches {
        return Err(ClassifierError::MatchCapacity {
            count: rules.len(),
            max: max_matches,
        });
    }
    Ok(rules)
}
