//! dedu-hash: keyed content hashing for deduplication identities
//!
//! Two fingerprints share one secret HMAC key:
//! - `content`: the strong, streaming whole-content hash (`1-…` strings),
//!   the canonical identity of a blob.
//! - `quasi`: a constant-time seek-sample hash of a file (`q1-…` strings),
//!   cheap enough to use as an index key for identity probing. Collision
//!   prone by construction; never a substitute for the content hash.

pub mod content;
pub mod quasi;

pub use content::{looks_like_deduhash, Hasher};
pub use quasi::Quasihasher;
