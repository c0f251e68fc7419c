//! Field layouts behind the `entry` facade.
//!
//! `entry.rs` owns the record types and the type-id dispatch; the modules here
//! own the byte layout of each record kind.

pub(crate) mod body;
pub(crate) mod header;
pub(crate) mod response;
