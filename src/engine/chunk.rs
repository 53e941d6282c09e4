//! Phase chunks.
//!
//! Phase 0 chunks ([`FieldChunk`]) map a raw field value to a class id.
//! Later phases ([`MergeChunk`]) map the class ids of their parent chunks,
//! combined into one composite index, to a class whose bitmap is the
//! intersection of the parents' bitmaps.

use std::collections::HashMap;

use super::bitmap::Bitmap;
use super::eqclass::{ClassId, EqTable, UNREACHABLE};
use super::number_line::NumberLine;
use super::projection::{ChunkKey, Spans};
use crate::error::{ClassifierError, Result};
use crate::types::PacketMeta;

#[derive(Debug, Clone)]
pub(crate) struct FieldChunk {
    pub key: ChunkKey,
    pub cells: Vec<ClassId>,
    pub table: EqTable,
}

impl FieldChunk {
    /// Build a chunk by sweeping a completed number line
    pub fn from_line(line: NumberLine, bits: usize, prealloc: usize) -> Self {
        let key = line.key();
        let mut table = EqTable::with_preallocated(bits, prealloc);
        let cells = line.sweep(&mut table, bits);
        Self { key, cells, table }
    }

    /// Build a chunk whose every cell holds `baseline`
    pub fn uniform(key: ChunkKey, baseline: &Bitmap, prealloc: usize) -> Self {
        let points = key.points();
        let mut table = EqTable::with_preallocated(baseline.len(), prealloc);
        let id = table.find_or_create(baseline);
        table.acquire(id, points as u32 - 1);
        Self {
            key,
            cells: vec![id; points],
            table,
        }
    }

    #[inline]
    pub fn lookup(&self, packet: &PacketMeta<'_>) -> Option<ClassId> {
        let value = self.key.read(packet)?;
        self.cells.get(value).copied()
    }

    /// Add an identity bit to the cells in `spans`.
    ///
    /// Each distinct old class in the range is mapped once to the class of
    /// its bitmap plus `bit`. Old references are dropped only after the pass
    /// so no id is recycled while cells still hold it.
    pub fn add_identity(&mut self, bit: usize, spans: &Spans) {
        if spans.is_full(self.key.points()) {
            self.table.set_bit_all(bit);
            return;
        }

        let mut remap: HashMap<ClassId, ClassId> = HashMap::new();
        let mut released: HashMap<ClassId, u32> = HashMap::new();
        let mut scratch = Bitmap::new(self.table.bitmap(self.cells[0]).len());

        for span in spans.as_slice() {
            for cell in &mut self.cells[span.start as usize..span.end as usize] {
                let old = *cell;
                let new = match remap.get(&old) {
                    Some(&new) => {
                        self.table.acquire(new, 1);
                        new
                    }
                    None => {
                        scratch.clone_from(self.table.bitmap(old));
                        scratch.set(bit);
                        let new = self.table.find_or_create(&scratch);
                        remap.insert(old, new);
                        new
                    }
                };
                *cell = new;
                *released.entry(old).or_insert(0) += 1;
            }
        }

        for (old, count) in released {
            self.table.release(old, count);
        }
    }

    /// Add an identity that does not constrain this chunk
    pub fn add_wildcard(&mut self, bit: usize) {
        self.table.set_bit_all(bit);
    }

    pub fn remove_bit(&mut self, bit: usize, remap: bool) -> usize {
        clear_bit_in(&mut self.table, &mut self.cells, bit, remap)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MergeChunk {
    /// Parent chunk indices in the previous phase, in index order
    pub parents: Vec<usize>,
    /// Parent `max_id` values the cells were composed with
    pub dims: Vec<usize>,
    pub cells: Vec<ClassId>,
    pub table: EqTable,
}

impl MergeChunk {
    pub fn new(parents: Vec<usize>, bits: usize) -> Self {
        Self {
            parents,
            dims: Vec::new(),
            cells: Vec::new(),
            table: EqTable::new(bits),
        }
    }

    /// Composite index of the parents' class ids, first parent most significant
    #[inline]
    pub fn lookup(&self, prev: &[ClassId]) -> ClassId {
        let mut index = 0usize;
        for (&parent, &dim) in self.parents.iter().zip(&self.dims) {
            index = index * dim + prev[parent] as usize;
        }
        self.cells.get(index).copied().unwrap_or(UNREACHABLE)
    }

    /// Recompute every cell from the parent tables.
    ///
    /// `parents` must be given in the order of `self.parents`; `seed` is the
    /// starting bitmap of the intersection.
    pub fn compose(
        &mut self,
        parents: &[&EqTable],
        seed: &Bitmap,
        max_cells: usize,
        position: (usize, usize),
    ) -> Result<()> {
        self.dims = parents.iter().map(|p| p.max_id()).collect();
        let total = self
            .dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .filter(|&total| total <= max_cells)
            .ok_or_else(|| ClassifierError::ChunkTooLarge {
                phase: position.0,
                chunk: position.1,
                cells: self
                    .dims
                    .iter()
                    .fold(1usize, |acc, &d| acc.saturating_mul(d)),
                max: max_cells,
            })?;

        self.cells.clear();
        self.cells.resize(total, UNREACHABLE);
        self.table.clear();

        let mut scratch: Vec<Bitmap> =
            parents.iter().map(|_| Bitmap::new(seed.len())).collect();
        compose_level(
            parents,
            seed,
            &mut scratch,
            0,
            &mut self.table,
            &mut self.cells,
        );
        Ok(())
    }

    pub fn remove_bit(&mut self, bit: usize, remap: bool) -> usize {
        clear_bit_in(&mut self.table, &mut self.cells, bit, remap)
    }
}

/// Walk the Cartesian product of the parents' live classes.
///
/// Iteration order matches [`MergeChunk::lookup`]: the composite index is
/// `((id0 * dim1 + id1) * dim2 + id2) ...`. Combinations with a free parent id
/// stay [`UNREACHABLE`].
fn compose_level(
    parents: &[&EqTable],
    acc: &Bitmap,
    scratch: &mut [Bitmap],
    base: usize,
    table: &mut EqTable,
    cells: &mut [ClassId],
) {
    let Some((parent, rest)) = parents.split_first() else {
        cells[base] = table.find_or_create(acc);
        return;
    };
    let Some((next, deeper)) = scratch.split_first_mut() else {
        return;
    };

    let dim = parent.max_id();
    for id in 0..dim as ClassId {
        if !parent.is_live(id) {
            continue;
        }
        Bitmap::and_into(acc, parent.bitmap(id), next);
        compose_level(
            rest,
            next,
            deeper,
            base * dim + id as usize,
            table,
            cells,
        );
    }
}

/// Clear `bit` from every class of a chunk, merging classes that collide.
///
/// Returns the number of classes merged away.
fn clear_bit_in(table: &mut EqTable, cells: &mut [ClassId], bit: usize, remap: bool) -> usize {
    let mut merged = 0;
    for id in table.ids_with_bit(bit) {
        let Some(target) = table.clear_bit(id, bit) else {
            continue;
        };
        if !remap {
            continue;
        }
        let mut moved = 0u32;
        for cell in cells.iter_mut().filter(|c| **c == id) {
            *cell = target;
            moved += 1;
        }
        table.merge_into(id, target, moved);
        merged += 1;
    }
    merged
}

/// Number of merge phases needed to reduce `chunks` phase-0 chunks to one
pub(crate) fn merge_phase_count(chunks: usize, fan_in: usize) -> usize {
    let mut phases = 1;
    let mut reach = fan_in.max(2);
    while reach < chunks {
        reach = reach.saturating_mul(fan_in.max(2));
        phases += 1;
    }
    phases
}

/// Smallest factor `f` with `f^remaining >= n`
fn reduction_factor(n: usize, remaining: usize) -> usize {
    let mut factor = 1usize;
    while factor
        .checked_pow(remaining as u32)
        .is_some_and(|reach| reach < n)
    {
        factor += 1;
    }
    factor
}

/// Parent groups of every merge phase.
///
/// Chunks are grouped sequentially; each phase uses the smallest reduction
/// factor that still reaches a single chunk in the remaining phases. The
/// last phase always holds exactly one chunk.
pub(crate) fn merge_layout(chunks: usize, fan_in: usize) -> Vec<Vec<Vec<usize>>> {
    let phases = merge_phase_count(chunks, fan_in);
    let mut layout = Vec::with_capacity(phases);
    let mut n = chunks;
    for remaining in (1..=phases).rev() {
        let groups: Vec<Vec<usize>> = if n == 0 {
            vec![Vec::new()]
        } else {
            let factor = reduction_factor(n, remaining);
            (0..n)
                .collect::<Vec<_>>()
                .chunks(factor)
                .map(<[usize]>::to_vec)
                .collect()
        };
        n = groups.len();
        layout.push(groups);
    }
    layout
}
