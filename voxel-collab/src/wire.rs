//! Fixed binary wire codec for replicated values.
//!
//! Wire format (little-endian):
//! ```text
//! ┌─────────────┬──────────────────────────────┐
//! │ VariableId  │ payload                      │
//! │ i32, 4 B    │ fixed layout per bound type  │
//! └─────────────┴──────────────────────────────┘
//! ```
//!
//! There is no in-band type tag: both ends bind a [`VariableId`] to a value
//! type out of band (via the variable registry), and the payload layout
//! follows from that binding alone. The codec therefore carries no version
//! and no checksum — persistence that outlives a session goes through the
//! versioned envelope in `voxel-core` instead.
//!
//! The supported set is a closed enum of tagged variants ([`WireValue`]),
//! one per [`WireType`] token. Every `decode` consumes exactly the bytes
//! the paired `encode` produced.

use voxel_core::{ColorRgba, Pose, Quat, Vec3};

/// Numeric key binding a replicated value across the codec, transport, and
/// registry. Signed 32-bit, global namespace within a session.
pub type VariableId = i32;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// No type is registered for this token code.
    UnsupportedType(u8),
    /// The buffer ended before the payload did.
    UnexpectedEof { needed: usize, remaining: usize },
    /// Decode succeeded but bytes were left over — the payload cannot have
    /// been produced by the paired encode.
    TrailingBytes(usize),
    /// A length-prefixed string held a negative length or invalid UTF-8.
    BadString,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedType(code) => write!(f, "unsupported wire type code {code}"),
            Self::UnexpectedEof { needed, remaining } => {
                write!(f, "unexpected end of payload: needed {needed} bytes, {remaining} remain")
            }
            Self::TrailingBytes(count) => write!(f, "{count} trailing bytes after payload"),
            Self::BadString => write!(f, "malformed length-prefixed string"),
        }
    }
}

impl std::error::Error for WireError {}

/// Token identifying one supported value category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    I32 = 1,
    F32 = 2,
    Bool = 3,
    Str = 4,
    Vec3 = 5,
    Quat = 6,
    Color = 7,
    Pose = 8,
    VoxelEdit = 9,
    AvatarSpawn = 10,
    DrawingSpawn = 11,
    PeerDespawn = 12,
}

impl WireType {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Resolve a token code; unknown codes are a protocol error.
    pub fn from_code(code: u8) -> Result<Self, WireError> {
        match code {
            1 => Ok(Self::I32),
            2 => Ok(Self::F32),
            3 => Ok(Self::Bool),
            4 => Ok(Self::Str),
            5 => Ok(Self::Vec3),
            6 => Ok(Self::Quat),
            7 => Ok(Self::Color),
            8 => Ok(Self::Pose),
            9 => Ok(Self::VoxelEdit),
            10 => Ok(Self::AvatarSpawn),
            11 => Ok(Self::DrawingSpawn),
            12 => Ok(Self::PeerDespawn),
            other => Err(WireError::UnsupportedType(other)),
        }
    }
}

/// A voxel edit crossing the wire: the payload of a drawing's edit channel.
///
/// Field order is the payload layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelEditMsg {
    pub position: Vec3,
    pub color: ColorRgba,
    pub status: u8,
    pub kind: u8,
    pub rotation: Quat,
}

impl From<voxel_core::PixelData> for VoxelEditMsg {
    fn from(data: voxel_core::PixelData) -> Self {
        Self {
            position: data.position,
            color: data.color,
            status: data.status.code(),
            kind: data.kind.code(),
            rotation: data.rotation,
        }
    }
}

impl VoxelEditMsg {
    pub fn to_pixel_data(self) -> voxel_core::PixelData {
        voxel_core::PixelData {
            status: voxel_core::PixelStatus::from_code(self.status),
            position: self.position,
            color: self.color,
            kind: voxel_core::VoxelKind::from_code(self.kind),
            rotation: self.rotation,
        }
    }
}

/// Spawn announcement for an avatar id block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvatarSpawnMsg {
    pub base_id: VariableId,
    /// 1 when the receiving peer owns (drives) this avatar, else 0.
    pub is_owner: i32,
}

/// Spawn announcement for a shared drawing, carrying its full serialized
/// state so late joiners hydrate from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawingSpawnMsg {
    pub base_id: VariableId,
    pub payload: String,
}

/// Despawn announcement for a previously spawned id block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerDespawnMsg {
    pub base_id: VariableId,
}

/// Closed set of wire values, one variant per [`WireType`].
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    I32(i32),
    F32(f32),
    Bool(bool),
    Str(String),
    Vec3(Vec3),
    Quat(Quat),
    Color(ColorRgba),
    Pose(Pose),
    VoxelEdit(VoxelEditMsg),
    AvatarSpawn(AvatarSpawnMsg),
    DrawingSpawn(DrawingSpawnMsg),
    PeerDespawn(PeerDespawnMsg),
}

impl WireValue {
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::I32(_) => WireType::I32,
            Self::F32(_) => WireType::F32,
            Self::Bool(_) => WireType::Bool,
            Self::Str(_) => WireType::Str,
            Self::Vec3(_) => WireType::Vec3,
            Self::Quat(_) => WireType::Quat,
            Self::Color(_) => WireType::Color,
            Self::Pose(_) => WireType::Pose,
            Self::VoxelEdit(_) => WireType::VoxelEdit,
            Self::AvatarSpawn(_) => WireType::AvatarSpawn,
            Self::DrawingSpawn(_) => WireType::DrawingSpawn,
            Self::PeerDespawn(_) => WireType::PeerDespawn,
        }
    }
}

/// Sequential writer over a byte buffer.
pub struct WireWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// i32 byte length followed by UTF-8 bytes.
    pub fn write_str(&mut self, value: &str) {
        self.write_i32(value.len() as i32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_vec3(&mut self, value: &Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    pub fn write_quat(&mut self, value: &Quat) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }

    pub fn write_color(&mut self, value: &ColorRgba) {
        self.write_f32(value.r);
        self.write_f32(value.g);
        self.write_f32(value.b);
        self.write_f32(value.a);
    }

    pub fn write_pose(&mut self, value: &Pose) {
        self.write_vec3(&value.position);
        self.write_quat(&value.orientation);
    }
}

/// Sequential bounds-checked reader over a byte slice.
pub struct WireReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Start reading at `offset` (e.g. 4 to skip the id header).
    pub fn at(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < count {
            return Err(WireError::UnexpectedEof { needed: count, remaining: self.remaining() });
        }
        let slice = &self.bytes[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_str(&mut self) -> Result<String, WireError> {
        let length = self.read_i32()?;
        if length < 0 {
            return Err(WireError::BadString);
        }
        let bytes = self.take(length as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadString)
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, WireError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_quat(&mut self) -> Result<Quat, WireError> {
        Ok(Quat::new(self.read_f32()?, self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_color(&mut self) -> Result<ColorRgba, WireError> {
        Ok(ColorRgba::rgba(self.read_f32()?, self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_pose(&mut self) -> Result<Pose, WireError> {
        Ok(Pose::new(self.read_vec3()?, self.read_quat()?))
    }
}

/// Binds a Rust type to its wire token and fixed payload layout.
pub trait WireData: Sized + Clone {
    const TYPE: WireType;

    fn write(&self, w: &mut WireWriter<'_>);
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError>;
}

impl WireData for i32 {
    const TYPE: WireType = WireType::I32;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_i32(*self);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.read_i32()
    }
}

impl WireData for f32 {
    const TYPE: WireType = WireType::F32;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_f32(*self);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.read_f32()
    }
}

impl WireData for bool {
    const TYPE: WireType = WireType::Bool;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_bool(*self);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.read_bool()
    }
}

impl WireData for String {
    const TYPE: WireType = WireType::Str;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_str(self);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.read_str()
    }
}

impl WireData for Vec3 {
    const TYPE: WireType = WireType::Vec3;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_vec3(self);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.read_vec3()
    }
}

impl WireData for Quat {
    const TYPE: WireType = WireType::Quat;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_quat(self);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.read_quat()
    }
}

impl WireData for ColorRgba {
    const TYPE: WireType = WireType::Color;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_color(self);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.read_color()
    }
}

impl WireData for Pose {
    const TYPE: WireType = WireType::Pose;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_pose(self);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.read_pose()
    }
}

impl WireData for VoxelEditMsg {
    const TYPE: WireType = WireType::VoxelEdit;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_vec3(&self.position);
        w.write_color(&self.color);
        w.write_u8(self.status);
        w.write_u8(self.kind);
        w.write_quat(&self.rotation);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            position: r.read_vec3()?,
            color: r.read_color()?,
            status: r.read_u8()?,
            kind: r.read_u8()?,
            rotation: r.read_quat()?,
        })
    }
}

impl WireData for AvatarSpawnMsg {
    const TYPE: WireType = WireType::AvatarSpawn;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_i32(self.base_id);
        w.write_i32(self.is_owner);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { base_id: r.read_i32()?, is_owner: r.read_i32()? })
    }
}

impl WireData for DrawingSpawnMsg {
    const TYPE: WireType = WireType::DrawingSpawn;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_i32(self.base_id);
        w.write_str(&self.payload);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { base_id: r.read_i32()?, payload: r.read_str()? })
    }
}

impl WireData for PeerDespawnMsg {
    const TYPE: WireType = WireType::PeerDespawn;
    fn write(&self, w: &mut WireWriter<'_>) {
        w.write_i32(self.base_id);
    }
    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self { base_id: r.read_i32()? })
    }
}

/// Encode a value into a full `[id][payload]` message.
pub fn encode<T: WireData>(id: VariableId, value: &T) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    let mut writer = WireWriter::new(&mut buf);
    writer.write_i32(id);
    value.write(&mut writer);
    buf
}

/// Decode a full message produced by [`encode`], consuming every byte.
pub fn decode<T: WireData>(bytes: &[u8]) -> Result<(VariableId, T), WireError> {
    let mut reader = WireReader::new(bytes);
    let id = reader.read_i32()?;
    let value = T::read(&mut reader)?;
    if reader.remaining() > 0 {
        return Err(WireError::TrailingBytes(reader.remaining()));
    }
    Ok((id, value))
}

/// Read only the leading [`VariableId`] of a message.
pub fn peek_id(bytes: &[u8]) -> Result<VariableId, WireError> {
    WireReader::new(bytes).read_i32()
}

/// Dynamic decode for a known type token; consumes every byte.
pub fn decode_value(ty: WireType, bytes: &[u8]) -> Result<(VariableId, WireValue), WireError> {
    let mut reader = WireReader::new(bytes);
    let id = reader.read_i32()?;
    let value = decode_payload(ty, &mut reader)?;
    if reader.remaining() > 0 {
        return Err(WireError::TrailingBytes(reader.remaining()));
    }
    Ok((id, value))
}

/// Dynamic payload decode at the reader's current offset.
pub fn decode_payload(ty: WireType, r: &mut WireReader<'_>) -> Result<WireValue, WireError> {
    Ok(match ty {
        WireType::I32 => WireValue::I32(i32::read(r)?),
        WireType::F32 => WireValue::F32(f32::read(r)?),
        WireType::Bool => WireValue::Bool(bool::read(r)?),
        WireType::Str => WireValue::Str(String::read(r)?),
        WireType::Vec3 => WireValue::Vec3(Vec3::read(r)?),
        WireType::Quat => WireValue::Quat(Quat::read(r)?),
        WireType::Color => WireValue::Color(ColorRgba::read(r)?),
        WireType::Pose => WireValue::Pose(Pose::read(r)?),
        WireType::VoxelEdit => WireValue::VoxelEdit(VoxelEditMsg::read(r)?),
        WireType::AvatarSpawn => WireValue::AvatarSpawn(AvatarSpawnMsg::read(r)?),
        WireType::DrawingSpawn => WireValue::DrawingSpawn(DrawingSpawnMsg::read(r)?),
        WireType::PeerDespawn => WireValue::PeerDespawn(PeerDespawnMsg::read(r)?),
    })
}

/// Encode a dynamic value into a full message.
pub fn encode_value(id: VariableId, value: &WireValue) -> Vec<u8> {
    match value {
        WireValue::I32(v) => encode(id, v),
        WireValue::F32(v) => encode(id, v),
        WireValue::Bool(v) => encode(id, v),
        WireValue::Str(v) => encode(id, v),
        WireValue::Vec3(v) => encode(id, v),
        WireValue::Quat(v) => encode(id, v),
        WireValue::Color(v) => encode(id, v),
        WireValue::Pose(v) => encode(id, v),
        WireValue::VoxelEdit(v) => encode(id, v),
        WireValue::AvatarSpawn(v) => encode(id, v),
        WireValue::DrawingSpawn(v) => encode(id, v),
        WireValue::PeerDespawn(v) => encode(id, v),
    }
}
