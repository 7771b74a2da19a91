//! File-handling stages around the backend call.
//!
//! ```text
//! source ──▶ stage ──▶ (factory / backend) ──▶ artifact
//!  (path)   (private copy)                     (temp file, format extension)
//! ```
//!
//! 1. [`stage`]: copy the source into a private temp file, chunk by
//!    chunk, checking the cancellation token between chunks
//! 2. [`artifact`]: write converted content into a new temp file whose
//!    extension matches the output format
//!
//! The staged copy is owned by a guard that deletes it on drop, so it cannot
//! outlive the job even if the worker unwinds.

pub mod artifact;
pub mod stage;
