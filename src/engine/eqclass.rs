//! Equivalence-class table of one chunk.
//!
//! Maps each distinct rule bitmap seen in the chunk to a compact class id.
//! Ids are reference counted by the number of chunk cells holding them and
//! recycled through a free list once unused.

use std::collections::HashMap;

use super::bitmap::Bitmap;

/// Equivalence-class id within one chunk
pub(crate) type ClassId = u32;

/// Cell value for composite indices that no packet can reach
pub(crate) const UNREACHABLE: ClassId = ClassId::MAX;

#[derive(Debug, Clone)]
struct EqClass {
    bitmap: Bitmap,
    refs: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct EqTable {
    bits: usize,
    classes: Vec<EqClass>,
    index: HashMap<Bitmap, ClassId>,
    free: Vec<ClassId>,
}

impl EqTable {
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            classes: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
        }
    }

    /// Create a table with `count` unused entries already on the free list
    pub fn with_preallocated(bits: usize, count: usize) -> Self {
        let mut table = Self::new(bits);
        table.preallocate(count);
        table
    }

    fn preallocate(&mut self, count: usize) {
        let start = self.classes.len();
        self.classes.extend((0..count).map(|_| EqClass {
            bitmap: Bitmap::new(self.bits),
            refs: 0,
        }));
        // Lowest ids are handed out first.
        self.free
            .extend((start..start + count).rev().map(|id| id as ClassId));
    }

    /// Canonical class for `bitmap`, taking one reference on it
    pub fn find_or_create(&mut self, bitmap: &Bitmap) -> ClassId {
        if let Some(&id) = self.index.get(bitmap) {
            self.classes[id as usize].refs += 1;
            return id;
        }

        let id = match self.free.pop() {
            Some(id) => {
                let class = &mut self.classes[id as usize];
                class.bitmap.clone_from(bitmap);
                class.refs = 1;
                id
            }
            None => {
                let id = self.classes.len() as ClassId;
                self.classes.push(EqClass {
                    bitmap: bitmap.clone(),
                    refs: 1,
                });
                id
            }
        };
        self.index.insert(bitmap.clone(), id);
        id
    }

    pub fn acquire(&mut self, id: ClassId, count: u32) {
        self.classes[id as usize].refs += count;
    }

    /// Drop `count` references; an unused class goes to the free list
    pub fn release(&mut self, id: ClassId, count: u32) {
        let class = &mut self.classes[id as usize];
        debug_assert!(class.refs >= count, "class {} over-released", id);
        class.refs = class.refs.saturating_sub(count);
        if class.refs == 0 {
            if self.index.get(&class.bitmap) == Some(&id) {
                self.index.remove(&class.bitmap);
            }
            self.free.push(id);
        }
    }

    /// Move `count` cell references from one class to another
    pub fn merge_into(&mut self, from: ClassId, to: ClassId, count: u32) {
        self.acquire(to, count);
        self.release(from, count);
    }

    #[inline]
    pub fn bitmap(&self, id: ClassId) -> &Bitmap {
        &self.classes[id as usize].bitmap
    }

    #[inline]
    pub fn refs(&self, id: ClassId) -> u32 {
        self.classes[id as usize].refs
    }

    #[inline]
    pub fn is_live(&self, id: ClassId) -> bool {
        self.refs(id) > 0
    }

    /// One past the highest id ever allocated, free ids included
    #[inline]
    pub fn max_id(&self) -> usize {
        self.classes.len()
    }

    pub fn live_count(&self) -> usize {
        self.classes.iter().filter(|c| c.refs > 0).count()
    }

    pub fn live_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, c)| c.refs > 0)
            .map(|(id, _)| id as ClassId)
    }

    /// Live classes whose bitmap contains `bit`
    pub fn ids_with_bit(&self, bit: usize) -> Vec<ClassId> {
        self.live_ids()
            .filter(|&id| self.bitmap(id).test(bit))
            .collect()
    }

    /// Add `bit` to every live class.
    ///
    /// Rebuilds the canonical index; the lowest id wins if two live classes
    /// end up with the same bitmap.
    pub fn set_bit_all(&mut self, bit: usize) {
        self.index.clear();
        for (id, class) in self.classes.iter_mut().enumerate() {
            if class.refs == 0 {
                continue;
            }
            class.bitmap.set(bit);
            self.index
                .entry(class.bitmap.clone())
                .or_insert(id as ClassId);
        }
    }

    /// Remove `bit` from one class.
    ///
    /// Returns the canonical class that now holds the same bitmap, if any. In
    /// that case `id` is left out of the canonical index until its cells are
    /// moved with [`merge_into`](Self::merge_into).
    pub fn clear_bit(&mut self, id: ClassId, bit: usize) -> Option<ClassId> {
        let class = &mut self.classes[id as usize];
        if !class.bitmap.test(bit) {
            return None;
        }
        if self.index.get(&class.bitmap) == Some(&id) {
            self.index.remove(&class.bitmap);
        }
        class.bitmap.reset(bit);
        match self.index.get(&class.bitmap) {
            Some(&other) => Some(other),
            None => {
                self.index.insert(class.bitmap.clone(), id);
                None
            }
        }
    }

    /// Drop every class, keeping allocations
    pub fn clear(&mut self) {
        self.classes.clear();
        self.index.clear();
        self.free.clear();
    }
}
