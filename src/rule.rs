//! Rule model consumed by the classifiers.
//!
//! Rules are owned by the caller's rule manager. Classifiers read them while
//! an add or delete call is in progress and keep only derived state.

use ipnet::{Ipv4Net, Ipv6Net};

use crate::error::{ClassifierError, Result};
use crate::types::{Direction, FieldLocation, PacketMeta, RuleId};

/// Longest field a filter may cover (an IPv6 address)
pub const MAX_FIELD_LEN: usize = 16;

/// How a filter compares the packet bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchKind {
    /// `field & mask == value & mask`
    Exact(Vec<u8>),
    /// `min <= field <= max`, big-endian
    Range { min: Vec<u8>, max: Vec<u8> },
    /// `field & mask` equals one of the masked values
    Set(Vec<Vec<u8>>),
    /// Any value
    Wildcard,
}

/// One field constraint of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Field position for forward matching
    pub location: FieldLocation,
    /// Field position for backward matching (bidirectional rules)
    pub reverse: Option<FieldLocation>,
    /// Field length in bytes
    pub len: usize,
    /// Value mask, one byte per field byte
    pub mask: Vec<u8>,
    pub kind: MatchKind,
}

impl Filter {
    /// Exact match on every bit of the field
    pub fn exact(location: FieldLocation, value: impl Into<Vec<u8>>) -> Self {
        let value = value.into();
        let len = value.len();
        Self {
            location,
            reverse: None,
            len,
            mask: vec![0xff; len],
            kind: MatchKind::Exact(value),
        }
    }

    /// Exact match on the bits selected by `mask`
    pub fn masked(
        location: FieldLocation,
        value: impl Into<Vec<u8>>,
        mask: impl Into<Vec<u8>>,
    ) -> Self {
        let value = value.into();
        Self {
            location,
            reverse: None,
            len: value.len(),
            mask: mask.into(),
            kind: MatchKind::Exact(value),
        }
    }

    /// Inclusive big-endian range
    pub fn range(
        location: FieldLocation,
        min: impl Into<Vec<u8>>,
        max: impl Into<Vec<u8>>,
    ) -> Self {
        let min = min.into();
        let max = max.into();
        Self {
            location,
            reverse: None,
            len: min.len(),
            mask: vec![0xff; min.len()],
            kind: MatchKind::Range { min, max },
        }
    }

    /// Inclusive range over a 16-bit field such as a port
    pub fn range_u16(location: FieldLocation, min: u16, max: u16) -> Self {
        Self::range(location, min.to_be_bytes(), max.to_be_bytes())
    }

    /// Match any of the listed values
    pub fn set(location: FieldLocation, values: Vec<Vec<u8>>) -> Self {
        let len = values.first().map_or(0, Vec::len);
        Self {
            location,
            reverse: None,
            len,
            mask: vec![0xff; len],
            kind: MatchKind::Set(values),
        }
    }

    /// Match anything in a field of `len` bytes
    pub fn wildcard(location: FieldLocation, len: usize) -> Self {
        Self {
            location,
            reverse: None,
            len,
            mask: vec![0; len],
            kind: MatchKind::Wildcard,
        }
    }

    /// Exact match on a single byte
    pub fn u8(location: FieldLocation, value: u8) -> Self {
        Self::exact(location, [value])
    }

    /// Exact match on a 16-bit big-endian field
    pub fn u16(location: FieldLocation, value: u16) -> Self {
        Self::exact(location, value.to_be_bytes())
    }

    /// Match an IPv4 address field against a network prefix
    pub fn ipv4_prefix(location: FieldLocation, net: Ipv4Net) -> Self {
        Self::masked(location, net.network().octets(), net.netmask().octets())
    }

    /// Match an IPv6 address field against a network prefix
    pub fn ipv6_prefix(location: FieldLocation, net: Ipv6Net) -> Self {
        Self::masked(location, net.network().octets(), net.netmask().octets())
    }

    /// Set the field position used for backward matching
    pub fn with_reverse(mut self, location: FieldLocation) -> Self {
        self.reverse = Some(location);
        self
    }

    /// Field position for the given direction
    pub fn location_for(&self, direction: Direction) -> FieldLocation {
        match direction {
            Direction::Forward => self.location,
            Direction::Backward => self.reverse.unwrap_or(self.location),
        }
    }

    /// Check the structural consistency of the filter
    pub fn validate(&self, uid: RuleId) -> Result<()> {
        if self.len == 0 || self.len > MAX_FIELD_LEN {
            return Err(ClassifierError::invalid(
                uid,
                format!("field length {} outside 1..={}", self.len, MAX_FIELD_LEN),
            ));
        }
        for location in std::iter::once(self.location).chain(self.reverse) {
            if location.offset as usize + self.len > u16::MAX as usize + 1 {
                return Err(ClassifierError::invalid(
                    uid,
                    format!(
                        "field at offset {} with {} bytes ends past the last layer offset",
                        location.offset, self.len
                    ),
                ));
            }
        }
        if self.mask.len() != self.len {
            return Err(ClassifierError::invalid(
                uid,
                format!("mask has {} bytes, field has {}", self.mask.len(), self.len),
            ));
        }
        let check_len = |value: &[u8], what: &str| {
            if value.len() == self.len {
                Ok(())
            } else {
                Err(ClassifierError::invalid(
                    uid,
                    format!("{} has {} bytes, field has {}", what, value.len(), self.len),
                ))
            }
        };
        match &self.kind {
            MatchKind::Exact(value) => check_len(value, "value")?,
            MatchKind::Range { min, max } => {
                check_len(min, "range minimum")?;
                check_len(max, "range maximum")?;
                if min > max {
                    return Err(ClassifierError::invalid(uid, "range minimum above maximum"));
                }
            }
            MatchKind::Set(values) => {
                if values.is_empty() {
                    return Err(ClassifierError::invalid(uid, "empty value set"));
                }
                for value in values {
                    check_len(value, "set value")?;
                }
            }
            MatchKind::Wildcard => {}
        }
        Ok(())
    }

    /// Evaluate the filter against the packet bytes at `location`
    pub fn matches_at(&self, packet: &PacketMeta<'_>, location: FieldLocation) -> bool {
        let Some(field) = packet.field(location, self.len) else {
            return false;
        };
        match &self.kind {
            MatchKind::Exact(value) => masked_eq(field, value, &self.mask),
            MatchKind::Range { min, max } => field >= min.as_slice() && field <= max.as_slice(),
            MatchKind::Set(values) => values.iter().any(|v| masked_eq(field, v, &self.mask)),
            MatchKind::Wildcard => true,
        }
    }
}

fn masked_eq(field: &[u8], value: &[u8], mask: &[u8]) -> bool {
    field
        .iter()
        .zip(value)
        .zip(mask)
        .all(|((f, v), m)| f & m == v & m)
}

/// A classification rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub uid: RuleId,
    pub bidirectional: bool,
    pub filters: Vec<Filter>,
}

impl Rule {
    /// Create a unidirectional rule with no filters (matches every packet)
    pub fn new(uid: RuleId) -> Self {
        Self {
            uid,
            bidirectional: false,
            filters: Vec::new(),
        }
    }

    /// Append a filter
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Mark the rule as matching in both directions
    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }

    /// True if the rule has a backward identity.
    ///
    /// That requires the bidirectional flag and at least one filter with a
    /// reverse location.
    pub fn has_backward(&self) -> bool {
        self.bidirectional && self.filters.iter().any(|f| f.reverse.is_some())
    }

    /// Directions this rule has an identity in, forward first
    pub fn directions(&self) -> impl Iterator<Item = Direction> {
        let backward = self.has_backward().then_some(Direction::Backward);
        std::iter::once(Direction::Forward).chain(backward)
    }

    /// Check every filter
    pub fn validate(&self) -> Result<()> {
        for filter in &self.filters {
            filter.validate(self.uid)?;
        }
        Ok(())
    }

    /// Evaluate the rule directly against a packet
    pub fn matches(&self, packet: &PacketMeta<'_>) -> bool {
        self.directions()
            .any(|direction| self.matches_in(packet, direction))
    }

    /// Evaluate one identity of the rule directly against a packet
    pub fn matches_in(&self, packet: &PacketMeta<'_>, direction: Direction) -> bool {
        self.filters
            .iter()
            .all(|f| f.matches_at(packet, f.location_for(direction)))
    }
}
