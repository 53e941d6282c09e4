/// Externally assigned rule identifier
pub type RuleId = u32;

/// Maximum number of header layers a packet can expose
pub const MAX_LAYERS: usize = 8;

/// Reference to a packet header layer, resolved by the packet parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef(pub u8);

impl FieldRef {
    pub const LINK: FieldRef = FieldRef(0);
    pub const NETWORK: FieldRef = FieldRef(1);
    pub const TRANSPORT: FieldRef = FieldRef(2);
    pub const APPLICATION: FieldRef = FieldRef(3);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Byte position of a field: a header layer plus an offset into it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldLocation {
    pub layer: FieldRef,
    pub offset: u16,
}

impl FieldLocation {
    pub fn new(layer: FieldRef, offset: u16) -> Self {
        Self { layer, offset }
    }
}

/// Packet direction a rule identity matches in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Bit position of a rule's identity in this direction.
    #[inline]
    pub fn bit(self, uid: RuleId) -> usize {
        match self {
            Direction::Forward => 2 * uid as usize,
            Direction::Backward => 2 * uid as usize + 1,
        }
    }
}

/// Parsed packet metadata handed to the classifier
///
/// Each layer carries the byte offset of its header inside `payload`, or a
/// negative value when the packet does not contain that layer.
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta<'a> {
    offsets: [i32; MAX_LAYERS],
    payload: &'a [u8],
}

impl<'a> PacketMeta<'a> {
    /// Create metadata for a payload with no layers resolved
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            offsets: [-1; MAX_LAYERS],
            payload,
        }
    }

    /// Create metadata from a parser's offset table
    ///
    /// Entries beyond [`MAX_LAYERS`] are ignored.
    pub fn from_offsets(offsets: &[i32], payload: &'a [u8]) -> Self {
        let mut meta = Self::new(payload);
        for (slot, &offset) in meta.offsets.iter_mut().zip(offsets) {
            *slot = offset;
        }
        meta
    }

    /// Set the header offset of a layer
    pub fn with_layer(mut self, layer: FieldRef, offset: usize) -> Self {
        if let Some(slot) = self.offsets.get_mut(layer.index()) {
            *slot = i32::try_from(offset).unwrap_or(-1);
        }
        self
    }

    /// Header offset of a layer, `None` if the layer is absent
    #[inline]
    pub fn layer_offset(&self, layer: FieldRef) -> Option<usize> {
        let offset = *self.offsets.get(layer.index())?;
        usize::try_from(offset).ok()
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Bytes of a field, `None` if the layer is absent or the payload is short
    #[inline]
    pub fn field(&self, location: FieldLocation, len: usize) -> Option<&'a [u8]> {
        let start = self.layer_offset(location.layer)? + location.offset as usize;
        self.payload.get(start..start + len)
    }
}
