//! Projection of rule filters onto field chunks.
//!
//! A filter over `len` bytes is split into 2-byte chunks, with a trailing
//! 1-byte chunk for odd lengths. On each chunk the filter accepts a set of
//! raw values, represented as sorted, disjoint, coalesced half-open spans.
//! Values are read big-endian so numeric ranges stay contiguous.

use std::collections::BTreeMap;

use crate::error::{ClassifierError, Result};
use crate::rule::{Filter, MatchKind, Rule};
use crate::types::{Direction, FieldLocation, FieldRef, PacketMeta, RuleId};

/// Identifies one phase-0 chunk: a 1- or 2-byte slice of a header layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub layer: FieldRef,
    pub offset: u16,
    pub width: u8,
}

impl ChunkKey {
    /// Number of distinct raw values (points on the number line)
    #[inline]
    pub fn points(&self) -> usize {
        1usize << (8 * self.width as usize)
    }

    /// Raw chunk value of a packet, `None` if the bytes are not present
    #[inline]
    pub fn read(&self, packet: &PacketMeta<'_>) -> Option<usize> {
        let location = FieldLocation::new(self.layer, self.offset);
        match packet.field(location, self.width as usize)? {
            [b] => Some(*b as usize),
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo]) as usize),
            _ => None,
        }
    }
}

/// Half-open value interval `[start, end)` on a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Normalized set of spans accepted on one chunk
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Spans(Vec<Span>);

impl Spans {
    /// Every value of a line with `points` values
    pub fn full(points: usize) -> Self {
        Spans(vec![Span::new(0, points as u32)])
    }

    pub fn point(value: u32) -> Self {
        Spans(vec![Span::new(value, value + 1)])
    }

    /// Sort, drop empty spans and coalesce overlapping or adjacent ones
    pub fn from_unsorted(mut spans: Vec<Span>) -> Self {
        spans.retain(|s| s.start < s.end);
        spans.sort_unstable_by_key(|s| s.start);
        let mut out: Vec<Span> = Vec::with_capacity(spans.len());
        for span in spans {
            match out.last_mut() {
                Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
                _ => out.push(span),
            }
        }
        Spans(out)
    }

    pub fn as_slice(&self) -> &[Span] {
        &self.0
    }

    pub fn is_full(&self, points: usize) -> bool {
        matches!(self.0.as_slice(), [s] if s.start == 0 && s.end as usize >= points)
    }

    #[cfg(test)]
    pub fn contains(&self, value: u32) -> bool {
        self.0.iter().any(|s| s.start <= value && value < s.end)
    }

    /// Values in both span sets
    pub fn intersect(&self, other: &Spans) -> Spans {
        let (mut i, mut j) = (0, 0);
        let mut out = Vec::new();
        while i < self.0.len() && j < other.0.len() {
            let a = self.0[i];
            let b = other.0[j];
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start < end {
                out.push(Span::new(start, end));
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        Spans(out)
    }

    fn union(sets: impl IntoIterator<Item = Spans>) -> Spans {
        Spans::from_unsorted(sets.into_iter().flat_map(|s| s.0).collect())
    }
}

/// Per-chunk spans of one rule identity
pub(crate) type Projection = BTreeMap<ChunkKey, Spans>;

/// Project one identity of a rule onto its chunks.
///
/// Filters of the same identity that land on the same chunk intersect.
pub(crate) fn project(rule: &Rule, direction: Direction) -> Result<Projection> {
    let mut projection = Projection::new();
    for filter in &rule.filters {
        let location = filter.location_for(direction);
        for (key, spans) in filter_spans(rule.uid, filter, location)? {
            projection
                .entry(key)
                .and_modify(|existing| *existing = existing.intersect(&spans))
                .or_insert(spans);
        }
    }
    Ok(projection)
}

/// Chunk boundaries of a field: `(byte index, width)` pairs
fn chunk_layout(len: usize) -> impl Iterator<Item = (usize, u8)> {
    (0..len)
        .step_by(2)
        .map(move |i| (i, if len - i >= 2 { 2 } else { 1 }))
}

/// Big-endian value of `width` bytes starting at `index`
fn word(bytes: &[u8], index: usize, width: u8) -> u32 {
    bytes[index..index + width as usize]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

fn filter_spans(
    uid: RuleId,
    filter: &Filter,
    location: FieldLocation,
) -> Result<Vec<(ChunkKey, Spans)>> {
    filter.validate(uid)?;

    let chunks: Vec<(usize, ChunkKey)> = chunk_layout(filter.len)
        .map(|(i, width)| {
            let key = ChunkKey {
                layer: location.layer,
                offset: location.offset.saturating_add(i as u16),
                width,
            };
            (i, key)
        })
        .collect();

    let spans: Vec<Spans> = match &filter.kind {
        MatchKind::Wildcard => chunks
            .iter()
            .map(|(_, k)| Spans::full(k.points()))
            .collect(),
        MatchKind::Exact(value) => chunks
            .iter()
            .map(|&(i, k)| {
                let mask = word(&filter.mask, i, k.width);
                masked_spans(word(value, i, k.width), mask, k.width)
            })
            .collect(),
        MatchKind::Range { min, max } => range_spans(uid, &chunks, min, max)?,
        MatchKind::Set(values) => set_spans(uid, &chunks, values, &filter.mask)?,
    };

    Ok(chunks.into_iter().map(|(_, k)| k).zip(spans).collect())
}

/// Values `x` of a chunk with `x & mask == value & mask`
pub(crate) fn masked_spans(value: u32, mask: u32, width: u8) -> Spans {
    let all = (1u32 << (8 * width as u32)) - 1;
    let mask = mask & all;
    let base = value & mask;
    let free = !mask & all;

    // Free bits form a low run: a single contiguous span
    if free & free.wrapping_add(1) == 0 {
        return Spans(vec![Span::new(base, base + free + 1)]);
    }

    let mut spans = Vec::new();
    for x in 0..=all {
        if x & mask == base {
            spans.push(Span::new(x, x + 1));
        }
    }
    Spans::from_unsorted(spans)
}

fn range_spans(
    uid: RuleId,
    chunks: &[(usize, ChunkKey)],
    min: &[u8],
    max: &[u8],
) -> Result<Vec<Spans>> {
    let mut out = Vec::with_capacity(chunks.len());
    let mut split = false;
    for &(i, key) in chunks {
        let lo = word(min, i, key.width);
        let hi = word(max, i, key.width);
        if split {
            // Below the splitting chunk the range must cover the whole line
            if lo != 0 || hi as usize != key.points() - 1 {
                return Err(ClassifierError::invalid(
                    uid,
                    "range is not expressible as a product of chunk ranges",
                ));
            }
            out.push(Spans::full(key.points()));
        } else if lo == hi {
            out.push(Spans::point(lo));
        } else {
            split = true;
            out.push(Spans(vec![Span::new(lo, hi + 1)]));
        }
    }
    Ok(out)
}

fn set_spans(
    uid: RuleId,
    chunks: &[(usize, ChunkKey)],
    values: &[Vec<u8>],
    mask: &[u8],
) -> Result<Vec<Spans>> {
    let mut varying = None;
    for (n, &(i, key)) in chunks.iter().enumerate() {
        let m = word(mask, i, key.width);
        let first = word(&values[0], i, key.width) & m;
        if values.iter().any(|v| word(v, i, key.width) & m != first) {
            if varying.is_some() {
                return Err(ClassifierError::invalid(
                    uid,
                    "set values may differ in only one 2-byte chunk of the field",
                ));
            }
            varying = Some(n);
        }
    }

    Ok(chunks
        .iter()
        .enumerate()
        .map(|(n, &(i, key))| {
            let m = word(mask, i, key.width);
            if varying == Some(n) {
                Spans::union(
                    values
                        .iter()
                        .map(|v| masked_spans(word(v, i, key.width), m, key.width)),
                )
            } else {
                masked_spans(word(&values[0], i, key.width), m, key.width)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(offset: u16) -> FieldLocation {
        FieldLocation::new(FieldRef::NETWORK, offset)
    }

    fn key(offset: u16, width: u8) -> ChunkKey {
        ChunkKey {
            layer: FieldRef::NETWORK,
            offset,
            width,
        }
    }

    #[test]
    fn test_chunk_layout() {
        assert_eq!(chunk_layout(1).collect::<Vec<_>>(), vec![(0, 1)]);
        assert_eq!(chunk_layout(4).collect::<Vec<_>>(), vec![(0, 2), (2, 2)]);
        assert_eq!(chunk_layout(5).collect::<Vec<_>>(), vec![(0, 2), (2, 2), (4, 1)]);
    }

    #[test]
    fn test_masked_spans() {
        // Full mask: a single point
        assert_eq!(masked_spans(6, 0xff, 1), Spans::point(6));
        // Prefix mask: one contiguous span
        assert_eq!(masked_spans(0x0a00, 0xff00, 2), Spans(vec![Span::new(0x0a00, 0x0b00)]));
        // Empty mask: everything
        assert!(masked_spans(0x1234, 0, 2).is_full(65536));
        // Non-prefix mask: exact value set
        let spans = masked_spans(0x01, 0x0f, 1);
        assert_eq!(spans.as_slice().len(), 16);
        assert!(spans.contains(0x01));
        assert!(spans.contains(0xf1));
        assert!(!spans.contains(0x02));
    }

    #[test]
    fn test_spans_normalize_and_intersect() {
        let a = Spans::from_unsorted(vec![
            Span::new(10, 20),
            Span::new(0, 5),
            Span::new(5, 8),
            Span::new(30, 30),
        ]);
        assert_eq!(a, Spans(vec![Span::new(0, 8), Span::new(10, 20)]));

        let b = Spans(vec![Span::new(4, 12), Span::new(19, 40)]);
        assert_eq!(
            a.intersect(&b),
            Spans(vec![Span::new(4, 8), Span::new(10, 12), Span::new(19, 20)])
        );
    }

    #[test]
    fn test_project_exact_address() {
        let rule = Rule::new(1).with_filter(Filter::exact(net(12), [10, 0, 0, 1]));
        let projection = project(&rule, Direction::Forward).unwrap();
        assert_eq!(projection.len(), 2);
        assert_eq!(projection[&key(12, 2)], Spans::point(0x0a00));
        assert_eq!(projection[&key(14, 2)], Spans::point(0x0001));
    }

    #[test]
    fn test_project_range_on_one_chunk() {
        let rule = Rule::new(1).with_filter(Filter::range_u16(net(0), 1024, 2047));
        let projection = project(&rule, Direction::Forward).unwrap();
        assert_eq!(projection[&key(0, 2)], Spans(vec![Span::new(1024, 2048)]));
    }

    #[test]
    fn test_project_range_across_chunks() {
        let rule =
            Rule::new(1).with_filter(Filter::range(net(0), [10, 1, 0, 0], [10, 9, 255, 255]));
        let projection = project(&rule, Direction::Forward).unwrap();
        assert_eq!(projection[&key(0, 2)], Spans(vec![Span::new(0x0a01, 0x0a0a)]));
        assert!(projection[&key(2, 2)].is_full(65536));

        let rule =
            Rule::new(2).with_filter(Filter::range(net(0), [10, 1, 0, 5], [10, 9, 255, 255]));
        assert!(project(&rule, Direction::Forward).is_err());
    }

    #[test]
    fn test_project_set() {
        let rule = Rule::new(1).with_filter(Filter::set(net(9), vec![vec![6], vec![17]]));
        let projection = project(&rule, Direction::Forward).unwrap();
        assert_eq!(projection[&key(9, 1)], Spans(vec![Span::new(6, 7), Span::new(17, 18)]));

        let values = vec![vec![10, 0, 0, 1], vec![192, 168, 0, 2]];
        let rule = Rule::new(2).with_filter(Filter::set(net(0), values));
        assert!(project(&rule, Direction::Forward).is_err());
    }

    #[test]
    fn test_project_same_chunk_intersects() {
        let rule = Rule::new(1)
            .with_filter(Filter::range_u16(net(0), 100, 200))
            .with_filter(Filter::range_u16(net(0), 150, 300));
        let projection = project(&rule, Direction::Forward).unwrap();
        assert_eq!(projection[&key(0, 2)], Spans(vec![Span::new(150, 201)]));
    }

    #[test]
    fn test_project_backward_uses_reverse_location() {
        let rule = Rule::new(1)
            .bidirectional()
            .with_filter(Filter::u8(net(9), 6))
            .with_filter(Filter::u16(net(20), 80).with_reverse(net(22)));
        let projection = project(&rule, Direction::Backward).unwrap();
        assert!(projection.contains_key(&key(9, 1)));
        assert!(projection.contains_key(&key(22, 2)));
        assert!(!projection.contains_key(&key(20, 2)));
    }

    #[test]
    fn test_chunk_key_read() {
        let payload = [0u8, 0x12, 0x34];
        let packet = PacketMeta::new(&payload).with_layer(FieldRef::NETWORK, 0);
        assert_eq!(key(1, 2).read(&packet), Some(0x1234));
        assert_eq!(key(2, 1).read(&packet), Some(0x34));
        assert_eq!(key(2, 2).read(&packet), None);
    }
}
