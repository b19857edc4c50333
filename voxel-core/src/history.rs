//! Append-only edit history backing each shared drawing.
//!
//! The log is the source of truth: it is never reordered or mutated in
//! place. The "current" drawing is a pure function of a log prefix — for
//! each position, the most recent edit wins, and the position is visible
//! iff that edit's status is [`PixelStatus::Visible`].
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 EditHistory                    │
//! │                                                │
//! │  log:    edit ── edit ── edit ── edit ── edit  │
//! │                                          ▲     │
//! │  append-only ────────────────────────────┘     │
//! │                                                │
//! │  cache:  active snapshot + bounding box        │
//! │          (incremental on append,               │
//! │           full rebuild after truncation)       │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Undo is truncation: the tail of the log is dropped and the cache is
//! rebuilt from what remains. There is no redo — that is intentional, not
//! an oversight.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::math::{Bounds, ColorRgba, Quat, Vec3};

/// Visibility state recorded by an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PixelStatus {
    None = 0,
    Visible = 1,
    Deleted = 2,
}

impl PixelStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Lenient decode: unknown codes degrade to `None` so that data written
    /// by a newer peer still loads.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Visible,
            2 => Self::Deleted,
            0 => Self::None,
            other => {
                log::debug!("unknown pixel status {other}, treating as None");
                Self::None
            }
        }
    }
}

/// Voxel mesh variant used when rendering a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoxelKind {
    Cube = 0,
    Rounded = 1,
    RoundedEdge = 2,
    Sliced = 3,
    RoundedTop = 4,
    Half = 5,
    Chipped = 6,
    CutEdge = 7,
    CutTop = 8,
}

impl VoxelKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Lenient decode; unknown kinds render as plain cubes.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Cube,
            1 => Self::Rounded,
            2 => Self::RoundedEdge,
            3 => Self::Sliced,
            4 => Self::RoundedTop,
            5 => Self::Half,
            6 => Self::Chipped,
            7 => Self::CutEdge,
            8 => Self::CutTop,
            other => {
                log::debug!("unknown voxel kind {other}, treating as Cube");
                Self::Cube
            }
        }
    }
}

/// One pixel's full state as recorded by a single edit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelData {
    pub status: PixelStatus,
    pub position: Vec3,
    pub color: ColorRgba,
    pub kind: VoxelKind,
    pub rotation: Quat,
}

impl PixelData {
    /// A visible pixel at `position`.
    pub fn visible(position: Vec3, color: ColorRgba, kind: VoxelKind, rotation: Quat) -> Self {
        Self { status: PixelStatus::Visible, position, color, kind, rotation }
    }

    /// A delete marker at `position`. The magenta color is a tombstone
    /// marker and is never rendered.
    pub fn deleted(position: Vec3) -> Self {
        Self {
            status: PixelStatus::Deleted,
            position,
            color: ColorRgba::MAGENTA,
            kind: VoxelKind::Cube,
            rotation: Quat::IDENTITY,
        }
    }
}

/// One entry in the append-only log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelEdit {
    pub data: PixelData,
    pub timestamp: DateTime<Utc>,
}

impl PixelEdit {
    pub fn new(data: PixelData, timestamp: DateTime<Utc>) -> Self {
        Self { data, timestamp }
    }

    /// The position this edit applies to.
    pub fn key(&self) -> Vec3 {
        self.data.position
    }
}

/// Where an applied edit came from.
///
/// `Remote` edits were received over the network and must not be
/// re-broadcast; only `Local` edits fire the committed-edit subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOrigin {
    Local,
    Remote,
}

/// Result of [`EditHistory::add_edit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The edit was appended to the log.
    Committed,
    /// The edit was field-identical to the most recent edit at the same
    /// position and was discarded.
    Deduplicated,
}

type EditListener = Box<dyn FnMut(&PixelEdit)>;
type ResyncListener = Box<dyn FnMut(&[PixelEdit])>;

/// Append-only, position-keyed edit log with a cached active snapshot.
pub struct EditHistory {
    edits: Vec<PixelEdit>,
    /// Active pixels in first-edit order; the render list.
    active: Vec<PixelData>,
    bounds: Option<Bounds>,
    on_edit: Vec<EditListener>,
    on_resync: Vec<ResyncListener>,
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl EditHistory {
    /// Create an empty history (a new drawing).
    pub fn new() -> Self {
        Self {
            edits: Vec::new(),
            active: Vec::new(),
            bounds: None,
            on_edit: Vec::new(),
            on_resync: Vec::new(),
        }
    }

    /// Hydrate from an existing log (load or network spawn).
    pub fn from_edits(edits: Vec<PixelEdit>) -> Self {
        let mut history = Self::new();
        history.edits = edits;
        history.rebuild_cache();
        history
    }

    /// Number of edits in the log.
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// The full ordered log.
    pub fn edits(&self) -> &[PixelEdit] {
        &self.edits
    }

    /// Cached active snapshot, in first-edit order of positions.
    pub fn active(&self) -> &[PixelData] {
        &self.active
    }

    /// Aggregate bounding box of the active set, padded by half a voxel on
    /// each side. `None` when the drawing is empty.
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// Subscribe to committed local edits. Fires once per appended
    /// `Local` edit, never for `Remote` ones.
    pub fn on_edit(&mut self, listener: impl FnMut(&PixelEdit) + 'static) {
        self.on_edit.push(Box::new(listener));
    }

    /// Subscribe to full-resync notifications raised after truncation.
    /// Dependents should rebuild from the provided log rather than diff.
    pub fn on_resync(&mut self, listener: impl FnMut(&[PixelEdit]) + 'static) {
        self.on_resync.push(Box::new(listener));
    }

    /// Append an edit to the log.
    ///
    /// If `data` is field-identical to the most recent edit at the same
    /// position the edit is discarded and the log is unchanged. Dedup looks
    /// at that single most recent edit only; a revert to an older identical
    /// state is appended as a fresh entry.
    pub fn add_edit(&mut self, data: PixelData, origin: EditOrigin) -> AddOutcome {
        let previous = self.last_edit_at(&data.position).map(|e| e.data);
        if previous == Some(data) {
            return AddOutcome::Deduplicated;
        }

        let edit = PixelEdit::new(data, Utc::now());
        self.edits.push(edit);
        self.apply_to_cache(previous, data);

        if origin == EditOrigin::Local {
            let mut listeners = std::mem::take(&mut self.on_edit);
            for listener in listeners.iter_mut() {
                listener(&edit);
            }
            listeners.extend(self.on_edit.drain(..));
            self.on_edit = listeners;
        }

        AddOutcome::Committed
    }

    /// Append a batch of local edits, deduplicating each in turn.
    pub fn add_edits(&mut self, edits: impl IntoIterator<Item = PixelData>) {
        for data in edits {
            self.add_edit(data, EditOrigin::Local);
        }
    }

    /// Record a visible pixel at `position`.
    pub fn create_or_update(
        &mut self,
        position: Vec3,
        color: ColorRgba,
        kind: VoxelKind,
        rotation: Quat,
    ) -> AddOutcome {
        self.add_edit(PixelData::visible(position, color, kind, rotation), EditOrigin::Local)
    }

    /// Record a delete at `position`.
    pub fn delete_at(&mut self, position: Vec3) -> AddOutcome {
        self.add_edit(PixelData::deleted(position), EditOrigin::Local)
    }

    /// The active pixel at `position`, if its most recent edit is visible.
    pub fn active_at(&self, position: &Vec3) -> Option<PixelData> {
        self.last_edit_at(position)
            .filter(|e| e.data.status == PixelStatus::Visible)
            .map(|e| e.data)
    }

    /// Undo the most recent edit. Destructive; there is no redo.
    pub fn undo_last(&mut self) {
        self.clear_changes(1);
    }

    /// Irreversibly truncate the newest `count` edits from the log, then
    /// rebuild the cache and notify resync subscribers with the remaining
    /// log. `count < 1` is a complete no-op; oversized counts clear the
    /// whole log.
    pub fn clear_changes(&mut self, count: i32) {
        if count < 1 {
            return;
        }

        let removed = (count as usize).min(self.edits.len());
        self.edits.truncate(self.edits.len() - removed);
        self.rebuild_cache();

        let snapshot: Vec<PixelEdit> = self.edits.clone();
        let mut listeners = std::mem::take(&mut self.on_resync);
        for listener in listeners.iter_mut() {
            listener(&snapshot);
        }
        listeners.extend(self.on_resync.drain(..));
        self.on_resync = listeners;
    }

    /// The visible pixels after replaying only the first `prefix` edits.
    ///
    /// Pure last-write-wins replay: for each position touched within the
    /// prefix, its most recent edit decides — `Visible` includes the pixel,
    /// `Deleted` excludes it, `None` defers to the edit before it. Output
    /// order is first-edit order of positions.
    pub fn visible_at_prefix(&self, prefix: usize) -> Vec<PixelData> {
        let prefix = &self.edits[..prefix.min(self.edits.len())];

        let mut order: Vec<[u32; 3]> = Vec::new();
        let mut by_position: HashMap<[u32; 3], Vec<PixelData>> = HashMap::new();
        for edit in prefix {
            let key = edit.data.position.key();
            by_position
                .entry(key)
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(edit.data);
        }

        let mut visible = Vec::new();
        for key in order {
            for data in by_position[&key].iter().rev() {
                match data.status {
                    PixelStatus::Visible => {
                        visible.push(*data);
                        break;
                    }
                    PixelStatus::Deleted => break,
                    PixelStatus::None => continue,
                }
            }
        }
        visible
    }

    fn last_edit_at(&self, position: &Vec3) -> Option<&PixelEdit> {
        let key = position.key();
        self.edits.iter().rev().find(|e| e.data.position.key() == key)
    }

    /// Incremental cache update for a single appended edit.
    fn apply_to_cache(&mut self, previous: Option<PixelData>, new: PixelData) {
        if let Some(previous) = previous {
            let key = previous.position.key();
            if let Some(index) = self.active.iter().position(|p| p.position.key() == key) {
                self.active.remove(index);
            }
        }
        if new.status == PixelStatus::Visible {
            self.active.push(new);
        }
        self.bounds = Self::calculate_bounds(&self.active);
    }

    /// Full cache rebuild from the current log.
    fn rebuild_cache(&mut self) {
        self.active = self.visible_at_prefix(self.edits.len());
        self.bounds = Self::calculate_bounds(&self.active);
    }

    fn calculate_bounds(active: &[PixelData]) -> Option<Bounds> {
        let mut positions = active.iter().map(|p| p.position);
        let first = positions.next()?;
        let (min, max) = positions.fold((first, first), |(min, max), p| {
            (min.min(&p), max.max(&p))
        });

        let half = Vec3::ONE * 0.5;
        Some(Bounds::from_corners(min - half, max + half))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn visible(position: Vec3, color: ColorRgba) -> PixelData {
        PixelData::visible(position, color, VoxelKind::Cube, Quat::IDENTITY)
    }

    /// The four-edit seed dataset: create A, delete A, create B, recolor B.
    fn seeded() -> EditHistory {
        let mut history = EditHistory::new();
        history.add_edits([
            visible(Vec3::FORWARD, ColorRgba::BLACK),
            PixelData::deleted(Vec3::FORWARD),
            visible(Vec3::UP, ColorRgba::WHITE),
            visible(Vec3::UP, ColorRgba::BLACK),
        ]);
        history
    }

    #[test]
    fn test_deleted_pixels_leave_active_set() {
        let mut history = EditHistory::new();
        let pixel = visible(Vec3::new(0.0, 0.0, 1.0), ColorRgba::WHITE);

        history.add_edit(pixel, EditOrigin::Local);
        assert_eq!(history.active().len(), 1);

        history.add_edit(PixelData::deleted(pixel.position), EditOrigin::Local);
        assert!(history.active().is_empty());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_identical_edit_is_deduplicated() {
        let mut history = EditHistory::new();

        let first = history.create_or_update(Vec3::ONE, ColorRgba::WHITE, VoxelKind::Cube, Quat::IDENTITY);
        assert_eq!(first, AddOutcome::Committed);
        assert_eq!(history.len(), 1);

        let repeat = history.create_or_update(Vec3::ONE, ColorRgba::WHITE, VoxelKind::Cube, Quat::IDENTITY);
        assert_eq!(repeat, AddOutcome::Deduplicated);
        assert_eq!(history.len(), 1);

        let changed = history.create_or_update(Vec3::ONE, ColorRgba::BLACK, VoxelKind::Cube, Quat::IDENTITY);
        assert_eq!(changed, AddOutcome::Committed);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_dedup_only_checks_most_recent_edit_at_position() {
        // A revert to an older identical state is NOT deduplicated.
        let mut history = EditHistory::new();
        let white = visible(Vec3::ONE, ColorRgba::WHITE);
        let black = visible(Vec3::ONE, ColorRgba::BLACK);

        history.add_edit(white, EditOrigin::Local);
        history.add_edit(black, EditOrigin::Local);
        history.add_edit(white, EditOrigin::Local);

        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_last_write_wins_at_prefix() {
        let history = seeded();

        // Prefix 2: A created then deleted — nothing visible.
        assert!(history.visible_at_prefix(2).is_empty());

        // Prefix 3: only B, still white.
        let at3 = history.visible_at_prefix(3);
        assert_eq!(at3.len(), 1);
        assert_eq!(at3[0].position, Vec3::UP);
        assert_eq!(at3[0].color, ColorRgba::WHITE);

        // Full log: B recolored black.
        let at4 = history.visible_at_prefix(4);
        assert_eq!(at4.len(), 1);
        assert_eq!(at4[0].color, ColorRgba::BLACK);
    }

    #[test]
    fn test_prefix_zero_and_oversized() {
        let history = seeded();
        assert!(history.visible_at_prefix(0).is_empty());
        assert_eq!(history.visible_at_prefix(usize::MAX), history.visible_at_prefix(4));
    }

    #[test]
    fn test_snapshot_matches_prefix_replay() {
        let history = seeded();
        assert_eq!(history.active(), history.visible_at_prefix(history.len()).as_slice());
    }

    #[test]
    fn test_clear_changes_truncates_exactly() {
        let mut history = seeded();
        assert_eq!(history.len(), 4);

        history.clear_changes(1);
        assert_eq!(history.len(), 3);

        // Snapshot rebuilt: B reverted to white.
        assert_eq!(history.active().len(), 1);
        assert_eq!(history.active()[0].color, ColorRgba::WHITE);
    }

    #[test]
    fn test_clear_changes_bounds() {
        // count < 1 is a no-op; oversized counts clear everything.
        let mut history = seeded();
        history.clear_changes(0);
        assert_eq!(history.len(), 4);
        history.clear_changes(-5);
        assert_eq!(history.len(), 4);

        history.clear_changes(100);
        assert_eq!(history.len(), 0);
        assert!(history.active().is_empty());
        assert!(history.bounds().is_none());
    }

    #[test]
    fn test_active_at_deleted_position_is_none() {
        let history = seeded();
        assert!(history.active_at(&Vec3::FORWARD).is_none());
        assert_eq!(history.active_at(&Vec3::UP).map(|p| p.color), Some(ColorRgba::BLACK));
    }

    #[test]
    fn test_undo_last() {
        let mut history = seeded();
        history.undo_last();
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_local_edits_notify_remote_edits_do_not() {
        let mut history = EditHistory::new();
        let fired = Rc::new(RefCell::new(0));
        let counter = fired.clone();
        history.on_edit(move |_| *counter.borrow_mut() += 1);

        history.add_edit(visible(Vec3::UP, ColorRgba::WHITE), EditOrigin::Local);
        assert_eq!(*fired.borrow(), 1);

        history.add_edit(visible(Vec3::FORWARD, ColorRgba::WHITE), EditOrigin::Remote);
        assert_eq!(*fired.borrow(), 1);
        assert_eq!(history.len(), 2);

        // Deduplicated edits never notify.
        history.add_edit(visible(Vec3::UP, ColorRgba::WHITE), EditOrigin::Local);
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn test_truncation_notifies_resync_with_remaining_log() {
        let mut history = seeded();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        history.on_resync(move |edits| *sink.borrow_mut() = Some(edits.len()));

        history.clear_changes(2);
        assert_eq!(*seen.borrow(), Some(2));

        // No-op truncation raises no resync.
        *seen.borrow_mut() = None;
        history.clear_changes(0);
        assert!(seen.borrow().is_none());
    }

    #[test]
    fn test_bounds_padded_by_half_voxel() {
        let mut history = EditHistory::new();
        history.add_edit(visible(Vec3::ZERO, ColorRgba::WHITE), EditOrigin::Local);
        history.add_edit(visible(Vec3::new(2.0, 0.0, 0.0), ColorRgba::WHITE), EditOrigin::Local);

        let bounds = history.bounds().unwrap();
        assert_eq!(bounds.min(), Vec3::new(-0.5, -0.5, -0.5));
        assert_eq!(bounds.max(), Vec3::new(2.5, 0.5, 0.5));
    }

    #[test]
    fn test_from_edits_rebuilds_cache() {
        let original = seeded();
        let restored = EditHistory::from_edits(original.edits().to_vec());
        assert_eq!(restored.active(), original.active());
        assert_eq!(restored.bounds(), original.bounds());
    }

    #[test]
    fn test_status_none_defers_to_earlier_edit() {
        let mut history = EditHistory::new();
        let shown = visible(Vec3::UP, ColorRgba::WHITE);
        let mut blank = shown;
        blank.status = PixelStatus::None;

        history.add_edit(shown, EditOrigin::Local);
        history.add_edit(blank, EditOrigin::Local);

        // The None edit neither shows nor deletes; the replay falls through
        // to the earlier visible edit.
        let replayed = history.visible_at_prefix(2);
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].status, PixelStatus::Visible);
    }

    #[test]
    fn test_lenient_code_decoding() {
        assert_eq!(PixelStatus::from_code(1), PixelStatus::Visible);
        assert_eq!(PixelStatus::from_code(200), PixelStatus::None);
        assert_eq!(VoxelKind::from_code(8), VoxelKind::CutTop);
        assert_eq!(VoxelKind::from_code(42), VoxelKind::Cube);
    }
}
