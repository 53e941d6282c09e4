//! Number lines used by the bulk build.
//!
//! A number line covers every raw value of one chunk. Rule identities leave
//! start and end markers on it; sweeping the line left to right while
//! applying the markers yields the exact rule bitmap of every value.

use super::bitmap::Bitmap;
use super::eqclass::{ClassId, EqTable};
use super::projection::{ChunkKey, Spans};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MarkerKind {
    // Ends sort before starts at the same point.
    End,
    Start,
}

#[derive(Debug, Clone, Copy)]
struct Marker {
    point: u32,
    kind: MarkerKind,
    bit: u32,
}

#[derive(Debug)]
pub(crate) struct NumberLine {
    key: ChunkKey,
    markers: Vec<Marker>,
}

impl NumberLine {
    pub fn new(key: ChunkKey) -> Self {
        Self {
            key,
            markers: Vec::new(),
        }
    }

    pub fn key(&self) -> ChunkKey {
        self.key
    }

    /// Mark the values an identity matches on this line
    pub fn add_spans(&mut self, bit: usize, spans: &Spans) {
        let points = self.key.points() as u32;
        for span in spans.as_slice() {
            self.markers.push(Marker {
                point: span.start,
                kind: MarkerKind::Start,
                bit: bit as u32,
            });
            if span.end < points {
                self.markers.push(Marker {
                    point: span.end,
                    kind: MarkerKind::End,
                    bit: bit as u32,
                });
            }
        }
    }

    /// Mark an identity that does not constrain this line
    pub fn add_wildcard(&mut self, bit: usize) {
        self.markers.push(Marker {
            point: 0,
            kind: MarkerKind::Start,
            bit: bit as u32,
        });
    }

    /// Sweep the line into phase-0 cells, interning bitmaps in `table`.
    pub fn sweep(mut self, table: &mut EqTable, bits: usize) -> Vec<ClassId> {
        let points = self.key.points();
        self.markers.sort_unstable_by_key(|m| (m.point, m.kind));

        let mut cells = Vec::with_capacity(points);
        let mut running = Bitmap::new(bits);
        let mut markers = self.markers.iter().peekable();
        let mut point = 0usize;

        while point < points {
            while let Some(marker) = markers.next_if(|m| m.point as usize == point) {
                match marker.kind {
                    MarkerKind::Start => running.set(marker.bit as usize),
                    MarkerKind::End => running.reset(marker.bit as usize),
                }
            }
            let next = markers
                .peek()
                .map_or(points, |m| (m.point as usize).min(points));
            let run = next - point;

            let id = table.find_or_create(&running);
            table.acquire(id, run as u32 - 1);
            cells.extend(std::iter::repeat(id).take(run));
            point = next;
        }

        cells
    }
}
