//! Deterministic JSON merge utilities, used to overlay iteration-local
//! context (`$item`/`$index`/`$iteration`) and resolved `config_defaults`
//! without mutating the original value in place.

pub mod merge;

pub use merge::merge_json;
