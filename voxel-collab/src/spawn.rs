//! Session object spawning: avatars and shared drawings.
//!
//! Replicated objects occupy fixed-size blocks of variable ids handed out
//! by a forward-only allocator. Spawn and despawn announcements travel on
//! reserved control ids below every block range:
//!
//! ```text
//!   100_000  avatar spawn        200_000  drawing spawn
//!   100_001  avatar despawn      200_001  drawing despawn
//!   100_002+ avatar blocks (3)   200_002+ drawing blocks (3)
//! ```
//!
//! Avatars are host-assigned: the host allocates a block for every peer
//! that connects, tells the peer it owns the block (`is_owner = 1`) and
//! tells everyone else it does not. Drawings are spawned by whichever
//! peer creates one; every observer advances its allocator cursor past
//! any block it sees spawned, so later local allocations never collide
//! with earlier remote ones.
//!
//! On host loss every spawned object is torn down and the allocators
//! rewind, leaving the registries ready for a fresh session.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use voxel_core::{envelope, ColorRgba, EditHistory, EditOrigin, Pose, Quat, Vec3};

use crate::session::{
    NetTarget, PeerId, SessionError, SessionEvent, SessionHandle, SessionTransport,
};
use crate::sync::SyncVar;
use crate::wire::{
    self, AvatarSpawnMsg, DrawingSpawnMsg, PeerDespawnMsg, VariableId, VoxelEditMsg, WireData,
    WireError,
};

pub const AVATAR_SPAWN_ID: VariableId = 100_000;
pub const AVATAR_DESPAWN_ID: VariableId = 100_001;
const AVATAR_BLOCK_FIRST: VariableId = 100_002;

pub const DRAWING_SPAWN_ID: VariableId = 200_000;
pub const DRAWING_DESPAWN_ID: VariableId = 200_001;
const DRAWING_BLOCK_FIRST: VariableId = 200_002;

/// Every spawned object owns this many consecutive variable ids.
pub const BLOCK_SIZE: i32 = 3;

/// Spawn-layer errors.
#[derive(Debug)]
pub enum SpawnError {
    Session(SessionError),
    Envelope(voxel_core::EnvelopeError),
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session(e) => write!(f, "session error: {e}"),
            Self::Envelope(e) => write!(f, "drawing payload error: {e}"),
        }
    }
}

impl std::error::Error for SpawnError {}

impl From<SessionError> for SpawnError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

impl From<voxel_core::EnvelopeError> for SpawnError {
    fn from(e: voxel_core::EnvelopeError) -> Self {
        Self::Envelope(e)
    }
}

/// Forward-only block allocator.
///
/// The cursor only ever moves forward: local allocations advance it by one
/// block, and observing a remote spawn at or past the cursor jumps it past
/// that block. Ids are never reused within a session.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    first: VariableId,
    next: VariableId,
    block: i32,
}

impl IdAllocator {
    pub fn new(first: VariableId, block: i32) -> Self {
        Self { first, next: first, block }
    }

    /// Claim the next block, returning its base id.
    pub fn allocate(&mut self) -> VariableId {
        let base = self.next;
        self.next += self.block;
        base
    }

    /// Note a remotely spawned block so future allocations skip past it.
    pub fn observe(&mut self, base: VariableId) {
        if base >= self.next {
            self.next = base + self.block;
        }
    }

    /// Rewind to the initial cursor, for a fresh session.
    pub fn reset(&mut self) {
        self.next = self.first;
    }

    pub fn cursor(&self) -> VariableId {
        self.next
    }
}

/// Queue of decoded control messages, filled by transport dispatch and
/// drained by the owning registry's `update`.
struct Mailbox<T> {
    queue: VecDeque<T>,
}

impl<T> Mailbox<T> {
    fn bind(
        handle: &SessionHandle,
        id: VariableId,
    ) -> Result<Rc<RefCell<Self>>, SessionError>
    where
        T: WireData + 'static,
    {
        let mailbox = Rc::new(RefCell::new(Self { queue: VecDeque::new() }));
        let target: Rc<RefCell<dyn NetTarget>> = mailbox.clone();
        handle.bind(id, &target)?;
        Ok(mailbox)
    }

    fn drain(mailbox: &Rc<RefCell<Self>>) -> Vec<T> {
        mailbox.borrow_mut().queue.drain(..).collect()
    }
}

impl<T: WireData + 'static> NetTarget for Mailbox<T> {
    fn receive_message(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let (_, msg) = wire::decode::<T>(bytes)?;
        self.queue.push_back(msg);
        Ok(())
    }
}

/// A participant's presence: three tracked poses on one id block.
pub struct Avatar {
    base_id: VariableId,
    owned: bool,
    left_hand: Rc<RefCell<SyncVar<Pose>>>,
    right_hand: Rc<RefCell<SyncVar<Pose>>>,
    head: Rc<RefCell<SyncVar<Pose>>>,
}

impl Avatar {
    fn bind(handle: &SessionHandle, base_id: VariableId, owned: bool) -> Result<Self, SessionError> {
        Ok(Self {
            base_id,
            owned,
            left_hand: SyncVar::register(handle, base_id, Pose::default())?,
            right_hand: SyncVar::register(handle, base_id + 1, Pose::default())?,
            head: SyncVar::register(handle, base_id + 2, Pose::default())?,
        })
    }

    pub fn base_id(&self) -> VariableId {
        self.base_id
    }

    /// Whether this peer drives the avatar's poses.
    pub fn owned(&self) -> bool {
        self.owned
    }

    pub fn left_hand(&self) -> Pose {
        self.left_hand.borrow().get()
    }

    pub fn right_hand(&self) -> Pose {
        self.right_hand.borrow().get()
    }

    pub fn head(&self) -> Pose {
        self.head.borrow().get()
    }

    /// Push new tracking poses. Only the owning peer may drive an avatar;
    /// calls on a remote one are dropped.
    pub fn set_poses(&self, left_hand: Pose, right_hand: Pose, head: Pose) {
        if !self.owned {
            log::warn!("ignoring pose update on remote avatar {}", self.base_id);
            return;
        }
        self.left_hand.borrow_mut().set(left_hand);
        self.right_hand.borrow_mut().set(right_hand);
        self.head.borrow_mut().set(head);
    }

    /// Watch a remote avatar's head, e.g. to place its name tag.
    pub fn on_head_moved(&self, listener: impl FnMut(&Pose) + 'static) {
        self.head.borrow_mut().subscribe(listener);
    }
}

/// Host-authoritative registry of session avatars.
pub struct AvatarRegistry {
    handle: SessionHandle,
    allocator: IdAllocator,
    local: Option<Avatar>,
    remote: HashMap<VariableId, Avatar>,
    /// Host only: which block each connected peer drives, for despawn
    /// synthesis when the peer drops.
    peer_blocks: HashMap<PeerId, VariableId>,
    spawns: Rc<RefCell<Mailbox<AvatarSpawnMsg>>>,
    despawns: Rc<RefCell<Mailbox<PeerDespawnMsg>>>,
}

impl AvatarRegistry {
    pub fn new(handle: SessionHandle) -> Result<Self, SessionError> {
        let spawns = Mailbox::bind(&handle, AVATAR_SPAWN_ID)?;
        let despawns = Mailbox::bind(&handle, AVATAR_DESPAWN_ID)?;
        Ok(Self {
            handle,
            allocator: IdAllocator::new(AVATAR_BLOCK_FIRST, BLOCK_SIZE),
            local: None,
            remote: HashMap::new(),
            peer_blocks: HashMap::new(),
            spawns,
            despawns,
        })
    }

    /// The avatar this peer drives, once assigned.
    pub fn local(&self) -> Option<&Avatar> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> impl Iterator<Item = &Avatar> {
        self.remote.values()
    }

    pub fn remote_count(&self) -> usize {
        self.remote.len()
    }

    /// Spawn the host's own avatar. The host is not a peer of itself, so
    /// its block comes straight from the allocator. Optional: if never
    /// called, the avatar is created when the first peer connects.
    pub fn spawn_host_avatar(
        &mut self,
        transport: &SessionTransport,
    ) -> Result<VariableId, SessionError> {
        self.create_host_avatar(transport, None)
    }

    fn create_host_avatar(
        &mut self,
        transport: &SessionTransport,
        exclude: Option<PeerId>,
    ) -> Result<VariableId, SessionError> {
        let base_id = self.allocator.allocate();
        self.local = Some(Avatar::bind(&self.handle, base_id, true)?);
        let announce = wire::encode(AVATAR_SPAWN_ID, &AvatarSpawnMsg { base_id, is_owner: 0 });
        match exclude {
            Some(peer) => transport.send_except(peer, &announce),
            None => transport.send_to_all(&announce),
        }
        Ok(base_id)
    }

    /// Apply one tick's worth of session events and control messages.
    pub fn update(&mut self, transport: &SessionTransport, events: &[SessionEvent]) {
        for event in events {
            match event {
                SessionEvent::PeerConnected(peer) if transport.is_host() => {
                    if let Err(e) = self.assign_block(transport, *peer) {
                        log::error!("failed to spawn avatar for peer {peer}: {e}");
                    }
                }
                SessionEvent::PeerDisconnected(peer) if transport.is_host() => {
                    if let Some(base_id) = self.peer_blocks.remove(peer) {
                        self.remote.remove(&base_id);
                        transport.send_to_all(&wire::encode(
                            AVATAR_DESPAWN_ID,
                            &PeerDespawnMsg { base_id },
                        ));
                        log::info!("despawned avatar {base_id} of departed peer {peer}");
                    }
                }
                SessionEvent::HostLost => self.teardown(),
                _ => {}
            }
        }

        for msg in Mailbox::drain(&self.spawns) {
            self.allocator.observe(msg.base_id);
            let owned = msg.is_owner != 0;
            match Avatar::bind(&self.handle, msg.base_id, owned) {
                Ok(avatar) if owned => {
                    if self.local.is_some() {
                        log::warn!("replacing already-assigned local avatar");
                    }
                    self.local = Some(avatar);
                }
                Ok(avatar) => {
                    self.remote.insert(msg.base_id, avatar);
                }
                Err(e) => log::warn!("ignoring duplicate avatar spawn {}: {e}", msg.base_id),
            }
        }

        for msg in Mailbox::drain(&self.despawns) {
            if self.remote.remove(&msg.base_id).is_none() {
                log::debug!("despawn for unknown avatar {}", msg.base_id);
            }
        }
    }

    /// Replay existing avatars to a newcomer, then assign it a block of
    /// its own: the peer hears `is_owner = 1`, everyone else 0.
    fn assign_block(
        &mut self,
        transport: &SessionTransport,
        peer: PeerId,
    ) -> Result<(), SessionError> {
        // The host's own avatar must exist before the replay, or the
        // newcomer would never see it. The newcomer is excluded from the
        // announce; the replay loop below covers it.
        if self.local.is_none() {
            self.create_host_avatar(transport, Some(peer))?;
        }

        let existing: Vec<VariableId> = self
            .local
            .iter()
            .map(Avatar::base_id)
            .chain(self.remote.keys().copied())
            .collect();
        for base_id in existing {
            transport.send_to_peer(
                peer,
                &wire::encode(AVATAR_SPAWN_ID, &AvatarSpawnMsg { base_id, is_owner: 0 }),
            );
        }

        let base_id = self.allocator.allocate();
        self.remote.insert(base_id, Avatar::bind(&self.handle, base_id, false)?);
        self.peer_blocks.insert(peer, base_id);
        transport.send_to_peer(
            peer,
            &wire::encode(AVATAR_SPAWN_ID, &AvatarSpawnMsg { base_id, is_owner: 1 }),
        );
        transport.send_except(
            peer,
            &wire::encode(AVATAR_SPAWN_ID, &AvatarSpawnMsg { base_id, is_owner: 0 }),
        );
        log::info!("assigned avatar block {base_id} to peer {peer}");
        Ok(())
    }

    fn teardown(&mut self) {
        self.local = None;
        self.remote.clear();
        self.peer_blocks.clear();
        self.allocator.reset();
    }
}

/// A shared drawing: its edit history plus three replicated channels on
/// one id block (edits, placement pose, uniform scale).
pub struct Drawing {
    base_id: VariableId,
    history: Rc<RefCell<EditHistory>>,
    edit_var: Rc<RefCell<SyncVar<VoxelEditMsg>>>,
    pose_var: Rc<RefCell<SyncVar<Pose>>>,
    scale_var: Rc<RefCell<SyncVar<f32>>>,
}

impl Drawing {
    fn bind(
        handle: &SessionHandle,
        base_id: VariableId,
        history: EditHistory,
    ) -> Result<Self, SessionError> {
        let history = Rc::new(RefCell::new(history));

        // The placeholder never equals a real edit: status 0 marks an
        // untouched voxel and is never painted.
        let placeholder = VoxelEditMsg {
            position: Vec3::ZERO,
            color: ColorRgba::WHITE,
            status: 0,
            kind: 0,
            rotation: Quat::IDENTITY,
        };
        let edit_var = SyncVar::register(handle, base_id, placeholder)?;

        // Inbound edits land in the shared history as remote, which keeps
        // them from echoing back out through the local-commit hook below.
        let sink = history.clone();
        edit_var.borrow_mut().subscribe(move |msg: &VoxelEditMsg| {
            sink.borrow_mut().add_edit(msg.to_pixel_data(), EditOrigin::Remote);
        });

        let outbound = Rc::downgrade(&edit_var);
        history.borrow_mut().on_edit(move |edit| {
            if let Some(var) = outbound.upgrade() {
                var.borrow_mut().set(VoxelEditMsg::from(edit.data));
            }
        });

        Ok(Self {
            base_id,
            history,
            edit_var,
            pose_var: SyncVar::register(handle, base_id + 1, Pose::default())?,
            scale_var: SyncVar::register(handle, base_id + 2, 1.0_f32)?,
        })
    }

    pub fn base_id(&self) -> VariableId {
        self.base_id
    }

    /// The drawing's edit history. Local commits through this handle are
    /// broadcast automatically.
    pub fn history(&self) -> Rc<RefCell<EditHistory>> {
        self.history.clone()
    }

    pub fn paint(&self, position: Vec3, color: ColorRgba, kind: voxel_core::VoxelKind, rotation: Quat) {
        self.history.borrow_mut().create_or_update(position, color, kind, rotation);
    }

    pub fn erase(&self, position: Vec3) {
        self.history.borrow_mut().delete_at(position);
    }

    pub fn pose(&self) -> Pose {
        self.pose_var.borrow().get()
    }

    pub fn set_pose(&self, pose: Pose) {
        self.pose_var.borrow_mut().set(pose);
    }

    pub fn scale(&self) -> f32 {
        self.scale_var.borrow().get()
    }

    pub fn set_scale(&self, scale: f32) {
        self.scale_var.borrow_mut().set(scale);
    }

    pub fn on_pose_changed(&self, listener: impl FnMut(&Pose) + 'static) {
        self.pose_var.borrow_mut().subscribe(listener);
    }

    /// Watch edits arriving from other peers, e.g. to flash the touched
    /// voxel. Local edits do not fire this; use the history's own
    /// committed-edit hook for those.
    pub fn on_remote_edit(&self, listener: impl FnMut(&VoxelEditMsg) + 'static) {
        self.edit_var.borrow_mut().subscribe(listener);
    }

    fn spawn_payload(&self) -> Result<String, voxel_core::EnvelopeError> {
        envelope::serialize(&self.history.borrow())
    }
}

/// Registry of shared drawings. Any peer may spawn one; the host replays
/// every known drawing, with its current serialized state, to late
/// joiners.
pub struct DrawingRegistry {
    handle: SessionHandle,
    allocator: IdAllocator,
    drawings: HashMap<VariableId, Drawing>,
    spawns: Rc<RefCell<Mailbox<DrawingSpawnMsg>>>,
    despawns: Rc<RefCell<Mailbox<PeerDespawnMsg>>>,
}

impl DrawingRegistry {
    pub fn new(handle: SessionHandle) -> Result<Self, SessionError> {
        let spawns = Mailbox::bind(&handle, DRAWING_SPAWN_ID)?;
        let despawns = Mailbox::bind(&handle, DRAWING_DESPAWN_ID)?;
        Ok(Self {
            handle,
            allocator: IdAllocator::new(DRAWING_BLOCK_FIRST, BLOCK_SIZE),
            drawings: HashMap::new(),
            spawns,
            despawns,
        })
    }

    pub fn get(&self, base_id: VariableId) -> Option<&Drawing> {
        self.drawings.get(&base_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Drawing> {
        self.drawings.values()
    }

    pub fn len(&self) -> usize {
        self.drawings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawings.is_empty()
    }

    /// Spawn a drawing seeded with `history` and announce it to the
    /// session, full state included.
    pub fn spawn_local(
        &mut self,
        transport: &SessionTransport,
        history: EditHistory,
    ) -> Result<VariableId, SpawnError> {
        let base_id = self.allocator.allocate();
        let drawing = Drawing::bind(&self.handle, base_id, history)?;
        let payload = drawing.spawn_payload()?;
        transport.send_to_all(&wire::encode(
            DRAWING_SPAWN_ID,
            &DrawingSpawnMsg { base_id, payload },
        ));
        self.drawings.insert(base_id, drawing);
        Ok(base_id)
    }

    /// Remove a drawing everywhere.
    pub fn despawn(&mut self, transport: &SessionTransport, base_id: VariableId) {
        if self.drawings.remove(&base_id).is_some() {
            transport.send_to_all(&wire::encode(
                DRAWING_DESPAWN_ID,
                &PeerDespawnMsg { base_id },
            ));
        }
    }

    /// Apply one tick's worth of session events and control messages.
    /// Drawings outlive their spawner; only host loss or an explicit
    /// despawn removes them.
    pub fn update(&mut self, transport: &SessionTransport, events: &[SessionEvent]) {
        for event in events {
            match event {
                SessionEvent::PeerConnected(peer) if transport.is_host() => {
                    self.replay_to(transport, *peer);
                }
                SessionEvent::HostLost => {
                    self.drawings.clear();
                    self.allocator.reset();
                }
                _ => {}
            }
        }

        for msg in Mailbox::drain(&self.spawns) {
            self.allocator.observe(msg.base_id);
            if self.drawings.contains_key(&msg.base_id) {
                log::debug!("drawing {} already spawned, ignoring", msg.base_id);
                continue;
            }
            let history = match envelope::deserialize(&msg.payload) {
                Ok(history) => history,
                Err(e) => {
                    log::warn!("dropping drawing spawn {} with bad payload: {e}", msg.base_id);
                    continue;
                }
            };
            match Drawing::bind(&self.handle, msg.base_id, history) {
                Ok(drawing) => {
                    self.drawings.insert(msg.base_id, drawing);
                }
                Err(e) => log::warn!("ignoring drawing spawn {}: {e}", msg.base_id),
            }
        }

        for msg in Mailbox::drain(&self.despawns) {
            if self.drawings.remove(&msg.base_id).is_none() {
                log::debug!("despawn for unknown drawing {}", msg.base_id);
            }
        }
    }

    /// Send a late joiner every known drawing with its current state, so
    /// it hydrates to the session's present rather than the spawn-time
    /// snapshot.
    fn replay_to(&self, transport: &SessionTransport, peer: PeerId) {
        for drawing in self.drawings.values() {
            match drawing.spawn_payload() {
                Ok(payload) => transport.send_to_peer(
                    peer,
                    &wire::encode(
                        DRAWING_SPAWN_ID,
                        &DrawingSpawnMsg { base_id: drawing.base_id, payload },
                    ),
                ),
                Err(e) => log::error!("cannot replay drawing {}: {e}", drawing.base_id),
            }
        }
    }
}
