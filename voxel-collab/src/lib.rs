//! # voxel-collab — Session replication layer for shared voxel drawings
//!
//! Provides host-relayed multiplayer editing over a fixed binary protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    PacketSocket     ┌─────────────┐
//! │   Client    │ ◄─────────────────► │    Host     │
//! │ (per peer)  │   [id][payload]     │  (relay)    │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ SyncVars    │                     │ SyncVars    │
//! │ (local)     │                     │ + fan-out   │
//! └──────┬──────┘                     │  except     │
//!        │                            │  sender     │
//! ┌──────┴──────┐                     └─────────────┘
//! │ EditHistory │
//! │ (per deck)  │
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`wire`] — Fixed little-endian codec (`[i32 id][payload]` messages)
//! - [`session`] — Host-relay transport over an injected [`session::PacketSocket`]
//! - [`memory`] — In-process socket hub for tests and local sessions
//! - [`sync`] — Equality-gated replicated variables
//! - [`spawn`] — Avatar and drawing registries with block id allocation

pub mod memory;
pub mod session;
pub mod spawn;
pub mod sync;
pub mod wire;

// Re-exports for convenience
pub use memory::{MemoryHub, MemorySocket};
pub use session::{
    PacketSocket, PeerId, SendTarget, SessionError, SessionEvent, SessionHandle, SessionState,
    SessionTransport, SocketEvent, TransportConfig, TransportStats,
};
pub use spawn::{
    Avatar, AvatarRegistry, Drawing, DrawingRegistry, IdAllocator, SpawnError, BLOCK_SIZE,
};
pub use sync::SyncVar;
pub use wire::{
    AvatarSpawnMsg, DrawingSpawnMsg, PeerDespawnMsg, VariableId, VoxelEditMsg, WireError,
    WireType, WireValue,
};
