//! Storage strategies behind the `cache` facade.
//!
//! `cache.rs` owns lifecycle and dispatch; the modules here own what each
//! mode writes to and reads from the cluster.

pub(crate) mod divided;
pub(crate) mod handle;
pub(crate) mod recovery;
pub(crate) mod removal;
pub(crate) mod unified;
pub(crate) mod version;
