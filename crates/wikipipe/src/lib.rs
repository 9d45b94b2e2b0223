//! Public facade crate for `wikipipe`.
//!
//! Re-exports the backend-agnostic types from `wikipipe-core` and the in-process
//! fetch layer (`wikipipe-local`) under `wikipipe::local`.

pub use wikipipe_core::*;
pub use wikipipe_local as local;
