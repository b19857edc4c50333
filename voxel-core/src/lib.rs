//! # voxel-core — data layer for collaborative voxel drawings
//!
//! The model behind each shared drawing: an append-only, position-keyed
//! edit log with a derived "what is visible right now" snapshot.
//!
//! ```text
//! editing / network           EditHistory                 rendering
//!       │                          │                          │
//!       ▼                          │                          │
//!  add_edit(data, origin) ──► log append ──► cached snapshot ─┘
//!                                  │              + bounds
//!  clear_changes(n) ──► truncate ──┴──► full rebuild + resync
//! ```
//!
//! ## Modules
//!
//! - [`math`] — `Vec3`, `Quat`, `ColorRgba`, `Pose`, `Bounds` value types
//! - [`history`] — the append-only edit log and active-snapshot cache
//! - [`envelope`] — versioned JSON persistence format
//!
//! Everything here is single-threaded by design; replication happens in the
//! `voxel-collab` crate on the same tick thread.

pub mod envelope;
pub mod history;
pub mod math;

pub use envelope::{EnvelopeError, FORMAT_VERSION};
pub use history::{
    AddOutcome, EditHistory, EditOrigin, PixelData, PixelEdit, PixelStatus, VoxelKind,
};
pub use math::{Bounds, ColorRgba, Pose, Quat, Vec3};
