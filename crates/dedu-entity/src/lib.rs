//! dedu-entity: the entity store and the quasi-hash dedup protocol
//!
//! An *entity* is the record associated with one deduhash. Entities live in
//! an external attribute store (a qmfs mount) holding newline-delimited
//! text attributes; the protocol layer uses the quasi-hash as a cheap index
//! into candidate entities and falls back to full hashing to resolve
//! ambiguity.

pub mod lines;
pub mod locate;
pub mod metadata;
pub mod register;
pub mod store;

pub use locate::{find_file_among_paths, locate_entity_file, LocateOpts};
pub use metadata::import_metadata_file;
pub use register::{register_or_get_entity, RegisterOpts};
pub use store::{EntityStore, QmfsStore};
