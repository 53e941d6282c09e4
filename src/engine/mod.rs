//! Recursive Flow Classification engine.
//!
//! Packets are classified in a fixed number of table lookups:
//!
//! 1. **Phase 0**: every [`FieldChunk`](chunk::FieldChunk) maps the raw value
//!    of a 1- or 2-byte packet slice to an equivalence class.
//! 2. **Merge phases**: every [`MergeChunk`](chunk::MergeChunk) combines the
//!    class ids of its parents in the previous phase into one composite index
//!    and maps it to a class holding the intersection of the parents' rule
//!    bitmaps. The last phase has a single chunk.
//! 3. **Rule map**: the final class id selects the ordered list of matching
//!    rule ids.
//!
//! The engine is plain data with no locking. [`RfcClassifier`] wraps it and
//! applies updates to a scratch copy, so a failed update never leaves a
//! partially modified engine visible.
//!
//! [`RfcClassifier`]: crate::RfcClassifier

pub mod bitmap;
pub(crate) mod chunk;
pub(crate) mod eqclass;
pub(crate) mod number_line;
pub(crate) mod projection;
pub(crate) mod rule_map;

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info};

pub use bitmap::Bitmap;

use crate::config::{ClassifierOptions, MAX_PHASE_CHUNKS};
use crate::error::{ClassifierError, Result};
use crate::rule::Rule;
use crate::types::{Direction, PacketMeta, RuleId};

use chunk::{merge_layout, merge_phase_count, FieldChunk, MergeChunk};
use eqclass::{ClassId, EqTable, UNREACHABLE};
use number_line::NumberLine;
use projection::{project, ChunkKey, Projection};
use rule_map::RuleMap;

/// Size of the classifier's lookup structures
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RfcStats {
    /// Installed rules
    pub rules: usize,
    /// Phases including phase 0 (zero when no rules are installed)
    pub phases: usize,
    /// Chunk count of each phase, phase 0 first
    pub chunks_per_phase: Vec<usize>,
    /// Live equivalence classes over all chunks
    pub classes: usize,
    /// Table cells over all chunks
    pub cells: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Engine {
    options: ClassifierOptions,
    fields: Vec<FieldChunk>,
    merges: Vec<Vec<MergeChunk>>,
    rule_map: RuleMap,
    /// Every installed identity; the neutral element of the intersections
    all_rules: Bitmap,
    /// Installed rules and whether each has a backward identity
    active: BTreeMap<RuleId, bool>,
}

impl Engine {
    pub fn new(options: ClassifierOptions) -> Self {
        let all_rules = Bitmap::new(options.bitmap_bits());
        Self {
            options,
            fields: Vec::new(),
            merges: Vec::new(),
            rule_map: RuleMap::default(),
            all_rules,
            active: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.active.len()
    }

    pub fn contains(&self, uid: RuleId) -> bool {
        self.active.contains_key(&uid)
    }

    fn check_capacity(&self, uid: RuleId) -> Result<()> {
        if uid as usize >= self.options.max_rules {
            return Err(ClassifierError::RuleCapacity {
                uid,
                max: self.options.max_rules,
            });
        }
        Ok(())
    }

    /// Validate a rule against the engine's limits without installing it
    pub fn check_rule(&self, rule: &Rule) -> Result<()> {
        self.check_capacity(rule.uid)?;
        for direction in rule.directions() {
            project(rule, direction)?;
        }
        Ok(())
    }

    /// Bulk precomputation from a complete rule set
    pub fn build(options: &ClassifierOptions, rules: &[Rule]) -> Result<Self> {
        let started = Instant::now();
        let mut engine = Self::new(options.clone());
        if rules.is_empty() {
            return Ok(engine);
        }
        let bits = options.bitmap_bits();

        let mut identities: Vec<(usize, Projection)> = Vec::new();
        for rule in rules {
            engine.check_capacity(rule.uid)?;
            if engine.active.insert(rule.uid, rule.has_backward()).is_some() {
                return Err(ClassifierError::DuplicateRule(rule.uid));
            }
            for direction in rule.directions() {
                let bit = direction.bit(rule.uid);
                identities.push((bit, project(rule, direction)?));
                engine.all_rules.set(bit);
            }
        }

        let mut lines: BTreeMap<ChunkKey, NumberLine> = BTreeMap::new();
        for (_, projection) in &identities {
            for key in projection.keys() {
                lines.entry(*key).or_insert_with(|| NumberLine::new(*key));
            }
        }
        if lines.len() > options.max_chunks {
            return Err(ClassifierError::ChunkLimit {
                max: options.max_chunks,
            });
        }
        let required = 1 + merge_phase_count(lines.len(), options.max_fan_in);
        if required > options.max_phases {
            return Err(ClassifierError::PhaseLimit {
                required,
                max: options.max_phases,
            });
        }

        // Identities without a constraint on a line match all of it.
        for (bit, projection) in &identities {
            for (key, line) in lines.iter_mut() {
                match projection.get(key) {
                    Some(spans) => line.add_spans(*bit, spans),
                    None => line.add_wildcard(*bit),
                }
            }
        }

        engine.fields = lines
            .into_values()
            .map(|line| FieldChunk::from_line(line, bits, options.prealloc_classes))
            .collect();
        engine.merges = merge_layout(engine.fields.len(), options.max_fan_in)
            .into_iter()
            .map(|groups| {
                groups
                    .into_iter()
                    .map(|parents| MergeChunk::new(parents, bits))
                    .collect()
            })
            .collect();
        engine.recompute()?;

        info!(
            rules = engine.active.len(),
            chunks = engine.fields.len(),
            phases = engine.merges.len() + 1,
            elapsed_us = started.elapsed().as_micros() as u64,
            "built RFC tables"
        );
        Ok(engine)
    }

    /// Add one rule to the live tables.
    ///
    /// Phase-0 chunks are edited cell by cell; the merge phases and the rule
    /// map are recomputed. On error the engine may be partially updated, so
    /// callers apply this to a scratch copy.
    pub fn add_rule(&mut self, rule: &Rule) -> Result<()> {
        if self.is_empty() {
            *self = Self::build(&self.options, std::slice::from_ref(rule))?;
            return Ok(());
        }
        self.check_capacity(rule.uid)?;
        if self.contains(rule.uid) {
            return Err(ClassifierError::DuplicateRule(rule.uid));
        }

        let started = Instant::now();
        let first_new = self.fields.len();
        for direction in rule.directions() {
            let bit = direction.bit(rule.uid);
            let projection = project(rule, direction)?;
            self.add_identity(bit, &projection)?;
            self.all_rules.set(bit);
        }

        for field in first_new..self.fields.len() {
            self.attach(field);
        }
        self.active.insert(rule.uid, rule.has_backward());
        self.recompute()?;

        debug!(
            uid = rule.uid,
            new_chunks = self.fields.len() - first_new,
            elapsed_us = started.elapsed().as_micros() as u64,
            "added rule"
        );
        Ok(())
    }

    fn add_identity(&mut self, bit: usize, projection: &Projection) -> Result<()> {
        let mut touched = vec![false; self.fields.len()];
        for (key, spans) in projection {
            match self.fields.iter().position(|c| c.key == *key) {
                Some(index) => {
                    self.fields[index].add_identity(bit, spans);
                    touched[index] = true;
                }
                None => {
                    if self.fields.len() >= self.options.max_chunks {
                        return Err(ClassifierError::ChunkLimit {
                            max: self.options.max_chunks,
                        });
                    }
                    // Installed rules do not constrain a new chunk.
                    let mut chunk =
                        FieldChunk::uniform(*key, &self.all_rules, self.options.prealloc_classes);
                    chunk.add_identity(bit, spans);
                    self.fields.push(chunk);
                }
            }
        }

        // Chunks created above are not in `touched` and are skipped by the zip.
        for (chunk, _) in self.fields.iter_mut().zip(&touched).filter(|(_, t)| !**t) {
            chunk.add_wildcard(bit);
        }
        Ok(())
    }

    /// Hang a new phase-0 chunk under the phase-1 chunk with the fewest
    /// parents, lowest index first on ties
    fn attach(&mut self, field: usize) {
        if let Some(target) = self
            .merges
            .first_mut()
            .and_then(|phase| phase.iter_mut().min_by_key(|c| c.parents.len()))
        {
            target.parents.push(field);
        }
    }

    /// Recompose every merge phase and rebuild the rule map
    fn recompute(&mut self) -> Result<()> {
        let max_cells = self.options.max_chunk_cells;
        for phase in 0..self.merges.len() {
            let (done, rest) = self.merges.split_at_mut(phase);
            let Some((current, _)) = rest.split_first_mut() else {
                break;
            };
            let parent_tables: Vec<&EqTable> = match done.last() {
                None => self.fields.iter().map(|c| &c.table).collect(),
                Some(previous) => previous.iter().map(|c| &c.table).collect(),
            };
            for (index, chunk) in current.iter_mut().enumerate() {
                let tables: Vec<&EqTable> =
                    chunk.parents.iter().map(|&p| parent_tables[p]).collect();
                chunk.compose(&tables, &self.all_rules, max_cells, (phase + 1, index))?;
            }
        }

        self.rule_map = match self.merges.last().and_then(|phase| phase.first()) {
            Some(last) => RuleMap::build(&last.table, self.options.max_matches)?,
            None => RuleMap::default(),
        };
        Ok(())
    }

    /// Remove one rule from the live tables
    pub fn delete_rule(&mut self, uid: RuleId) -> Result<()> {
        let started = Instant::now();
        let backward = self
            .active
            .remove(&uid)
            .ok_or(ClassifierError::UnknownRule(uid))?;

        // The rule map alone is enough for correct lookups; the class
        // bitmaps are cleaned below.
        self.rule_map.remove_rule(uid);

        let remap = self.options.remap_after_delete;
        let mut bits = Vec::with_capacity(2);
        if backward {
            bits.push(Direction::Backward.bit(uid));
        }
        bits.push(Direction::Forward.bit(uid));

        let mut merged = 0;
        for bit in bits {
            for chunk in &mut self.fields {
                merged += chunk.remove_bit(bit, remap);
            }
            for chunk in self.merges.iter_mut().flatten() {
                merged += chunk.remove_bit(bit, remap);
            }
            self.all_rules.reset(bit);
        }

        if self.active.is_empty() {
            *self = Self::new(self.options.clone());
            info!(uid, "last rule deleted, tables reset");
            return Ok(());
        }

        debug!(
            uid,
            merged_classes = merged,
            elapsed_us = started.elapsed().as_micros() as u64,
            "deleted rule"
        );
        Ok(())
    }

    /// Matching rule ids of a packet, in ascending order.
    ///
    /// Returns no matches if any phase-0 field is absent from the packet.
    #[inline]
    pub fn lookup(&self, packet: &PacketMeta<'_>) -> &[RuleId] {
        if self.merges.is_empty() {
            return &[];
        }

        let mut front = [0 as ClassId; MAX_PHASE_CHUNKS];
        let mut back = [0 as ClassId; MAX_PHASE_CHUNKS];
        let (mut prev, mut next) = (&mut front, &mut back);

        for (slot, chunk) in prev.iter_mut().zip(&self.fields) {
            match chunk.lookup(packet) {
                Some(id) => *slot = id,
                None => return &[],
            }
        }
        for phase in &self.merges {
            for (slot, chunk) in next.iter_mut().zip(phase) {
                *slot = chunk.lookup(&prev[..]);
            }
            std::mem::swap(&mut prev, &mut next);
        }

        match prev[0] {
            UNREACHABLE => &[],
            id => self.rule_map.get(id),
        }
    }

    pub fn stats(&self) -> RfcStats {
        if self.is_empty() {
            return RfcStats::default();
        }
        let mut chunks_per_phase = vec![self.fields.len()];
        chunks_per_phase.extend(self.merges.iter().map(Vec::len));

        let field_tables = self.fields.iter().map(|c| (&c.table, c.cells.len()));
        let merge_tables = self
            .merges
            .iter()
            .flatten()
            .map(|c| (&c.table, c.cells.len()));
        let (classes, cells) = field_tables
            .chain(merge_tables)
            .fold((0, 0), |(classes, cells), (table, len)| {
                (classes + table.live_count(), cells + len)
            });

        RfcStats {
            rules: self.active.len(),
            phases: chunks_per_phase.len(),
            chunks_per_phase,
            classes,
            cells,
        }
    }
}
