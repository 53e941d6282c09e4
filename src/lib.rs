//! RFC Classifier - Recursive Flow Classification packet classifier for Rust
//!
//! This library maps parsed packet metadata to the set of matching rules
//! with a fixed number of table lookups per packet:
//! - Exact, masked, range, set and wildcard filters on any header bytes
//! - Bidirectional rules with reverse field locations
//! - Bulk precomputation from a complete rule set
//! - Incremental add and delete of single rules on the live tables
//! - A linear reference classifier with the same interface
//!
//! # Example
//!
//! ```rust
//! use rfc_classifier::{Classifier, ClassifierOptions, RfcClassifier};
//! use rfc_classifier::{FieldLocation, FieldRef, Filter, PacketMeta, Rule};
//!
//! let proto = FieldLocation::new(FieldRef::NETWORK, 9);
//! let dst_port = FieldLocation::new(FieldRef::TRANSPORT, 2);
//!
//! let rules = vec![
//!     // TCP
//!     Rule::new(0).with_filter(Filter::u8(proto, 6)),
//!     // UDP to a registered port
//!     Rule::new(1)
//!         .with_filter(Filter::u8(proto, 17))
//!         .with_filter(Filter::range_u16(dst_port, 1024, 49151)),
//! ];
//!
//! let classifier = RfcClassifier::new(ClassifierOptions::new().with_max_rules(64)).unwrap();
//! classifier.add_rules(&rules).unwrap();
//!
//! // IPv4 header followed by a UDP header
//! let mut payload = [0u8; 28];
//! payload[9] = 17;
//! payload[22..24].copy_from_slice(&5353u16.to_be_bytes());
//! let packet = PacketMeta::new(&payload)
//!     .with_layer(FieldRef::NETWORK, 0)
//!     .with_layer(FieldRef::TRANSPORT, 20);
//!
//! assert_eq!(classifier.classify(&packet), vec![1]);
//! ```
//!
//! # Filters
//!
//! | Kind | Builder | Matches |
//! |------|---------|---------|
//! | Exact | `Filter::exact`, `Filter::u8`, `Filter::u16` | One value |
//! | Masked | `Filter::masked`, `Filter::ipv4_prefix` | Value under a bit mask |
//! | Range | `Filter::range`, `Filter::range_u16` | Inclusive big-endian range |
//! | Set | `Filter::set` | Any listed value |
//! | Wildcard | `Filter::wildcard` | Any value, field must be present |
//!
//! A rule matches when all of its filters match. A packet in which any
//! field used by an installed rule is absent matches nothing.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod rule;
pub mod types;

// Re-export commonly used items
pub use classifier::{Classifier, LinearClassifier, RfcClassifier};
pub use config::{ClassifierOptions, DEFAULT_MAX_RULES, MAX_PHASE_CHUNKS};
pub use engine::{Bitmap, RfcStats};
pub use error::{ClassifierError, Result};
pub use rule::{Filter, MatchKind, Rule, MAX_FIELD_LEN};
pub use types::{Direction, FieldLocation, FieldRef, PacketMeta, RuleId, MAX_LAYERS};
