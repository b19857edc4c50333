//! Versioned JSON envelope for persisted drawings.
//!
//! Wire shape (version 1):
//! ```json
//! {
//!   "version": 1,
//!   "edits": [
//!     {
//!       "status": 1,
//!       "position": { "x": 0.0, "y": 1.0, "z": 0.0 },
//!       "color": { "r": 1.0, "g": 1.0, "b": 1.0, "a": 1.0 },
//!       "voxelKind": 0,
//!       "rotation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 },
//!       "timestamp": "2026-08-30T12:00:00Z"
//!     }
//!   ]
//! }
//! ```
//!
//! A version mismatch is a warning, never an error: the reader proceeds
//! positionally with whatever it can parse. Schema migration is a problem
//! for the future; forward compatibility today means "do not crash".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::{EditHistory, PixelData, PixelEdit, PixelStatus, VoxelKind};
use crate::math::{ColorRgba, Quat, Vec3};

/// Envelope version written by this build.
pub const FORMAT_VERSION: i32 = 1;

/// Envelope errors. Malformed JSON is fatal; a version mismatch is not.
#[derive(Debug, Clone)]
pub enum EnvelopeError {
    /// The payload was not valid JSON for the envelope shape.
    Malformed(String),
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed drawing envelope: {e}"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

#[derive(Serialize, Deserialize)]
struct DrawingEnvelope {
    version: i32,
    edits: Vec<EditRecord>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditRecord {
    status: u8,
    position: Vec3,
    color: ColorRgba,
    voxel_kind: u8,
    rotation: Quat,
    timestamp: DateTime<Utc>,
}

impl From<&PixelEdit> for EditRecord {
    fn from(edit: &PixelEdit) -> Self {
        Self {
            status: edit.data.status.code(),
            position: edit.data.position,
            color: edit.data.color,
            voxel_kind: edit.data.kind.code(),
            rotation: edit.data.rotation,
            timestamp: edit.timestamp,
        }
    }
}

impl From<EditRecord> for PixelEdit {
    fn from(record: EditRecord) -> Self {
        PixelEdit::new(
            PixelData {
                status: PixelStatus::from_code(record.status),
                position: record.position,
                color: record.color,
                kind: VoxelKind::from_code(record.voxel_kind),
                rotation: record.rotation,
            },
            record.timestamp,
        )
    }
}

/// Serialize the full edit log into the versioned envelope.
pub fn serialize(history: &EditHistory) -> Result<String, EnvelopeError> {
    let envelope = DrawingEnvelope {
        version: FORMAT_VERSION,
        edits: history.edits().iter().map(EditRecord::from).collect(),
    };
    serde_json::to_string(&envelope).map_err(|e| EnvelopeError::Malformed(e.to_string()))
}

/// Deserialize an envelope into a hydrated history.
///
/// An unexpected version is logged and otherwise ignored; edits are read
/// positionally regardless.
pub fn deserialize(json: &str) -> Result<EditHistory, EnvelopeError> {
    let envelope: DrawingEnvelope =
        serde_json::from_str(json).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

    if envelope.version != FORMAT_VERSION {
        log::warn!(
            "drawing envelope version {} differs from current {FORMAT_VERSION}, reading anyway",
            envelope.version
        );
    }

    Ok(EditHistory::from_edits(
        envelope.edits.into_iter().map(PixelEdit::from).collect(),
    ))
}
