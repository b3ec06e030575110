// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The runtime value cell and its cast bridge.
//!
//! Every runtime value travels through a fixed-width, 16-byte [`Cell`]. The
//! engine never inspects the layout directly: typed access goes through
//! [`CellCast`], which defines `from_cell`/`into_cell` per logical type.
//! Reading a cell as `T` is defined only if it was last written as `T` (or
//! a type the language allows to alias: pointers, strings and block
//! descriptors share a representation when the engine produced them that
//! way). Unused lanes are always zero.

use core::fmt;

/// Width (and alignment) of a value cell in bytes.
pub const CELL_SIZE: u32 = 16;

/// A 16-byte, 16-byte-aligned value register.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct Cell {
    bytes: [u8; 16],
}

impl Cell {
    /// The all-zero cell. Also the short-circuit result of any interrupted
    /// value node.
    pub const ZERO: Self = Self { bytes: [0; 16] };

    /// Builds a cell from raw little-endian bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Returns the raw little-endian bytes.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        self.bytes
    }

    #[must_use]
    pub(crate) fn u32_lane(self, lane: usize) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.bytes[lane * 4..lane * 4 + 4]);
        u32::from_le_bytes(b)
    }

    pub(crate) fn set_u32_lane(&mut self, lane: usize, value: u32) {
        self.bytes[lane * 4..lane * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[must_use]
    pub(crate) fn i32_lane(self, lane: usize) -> i32 {
        self.u32_lane(lane) as i32
    }

    pub(crate) fn set_i32_lane(&mut self, lane: usize, value: i32) {
        self.set_u32_lane(lane, value as u32);
    }

    #[must_use]
    pub(crate) fn f32_lane(self, lane: usize) -> f32 {
        f32::from_bits(self.u32_lane(lane))
    }

    pub(crate) fn set_f32_lane(&mut self, lane: usize, value: f32) {
        self.set_u32_lane(lane, value.to_bits());
    }

    #[must_use]
    pub(crate) fn u64_pair(self, pair: usize) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.bytes[pair * 8..pair * 8 + 8]);
        u64::from_le_bytes(b)
    }

    pub(crate) fn set_u64_pair(&mut self, pair: usize, value: u64) {
        self.bytes[pair * 8..pair * 8 + 8].copy_from_slice(&value.to_le_bytes());
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({:08x} {:08x} {:08x} {:08x})",
            self.u32_lane(0), self.u32_lane(1), self.u32_lane(2), self.u32_lane(3))
    }
}

/// The cast bridge: packing/unpacking of one logical type.
///
/// Law: `T::from_cell(x.into_cell()) == x` for every representable `x`.
pub trait CellCast: Copy {
    /// Unpacks a cell written as this type.
    fn from_cell(cell: Cell) -> Self;
    /// Packs a value into a cell, zeroing unused lanes.
    fn into_cell(self) -> Cell;
}

/// A non-owning reference into the context's linear region.
///
/// Offset 0 is the null pointer; the region reserves its first cell so no
/// allocation can alias it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Ptr(pub u32);

impl Ptr {
    /// The null pointer.
    pub const NULL: Self = Self(0);

    /// Returns `true` for the null pointer.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offsets the pointer by `bytes`.
    #[must_use]
    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0 + bytes)
    }
}

/// A reference to a nul-terminated string in the linear region.
///
/// Shares the pointer representation; 0 is the null string.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StrRef(pub u32);

impl StrRef {
    /// The null string reference.
    pub const NULL: Self = Self(0);

    /// Returns `true` for the null string.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Logical value types recognised by the cast bridge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Boolean.
    Bool,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 32-bit float.
    Float,
    /// 2-lane signed integer vector.
    Int2,
    /// 3-lane signed integer vector.
    Int3,
    /// 4-lane signed integer vector.
    Int4,
    /// 2-lane unsigned integer vector.
    UInt2,
    /// 3-lane unsigned integer vector.
    UInt3,
    /// 4-lane unsigned integer vector.
    UInt4,
    /// 2-lane float vector.
    Float2,
    /// 3-lane float vector.
    Float3,
    /// 4-lane float vector.
    Float4,
    /// Signed half-open range pair.
    Range,
    /// Unsigned half-open range pair.
    URange,
    /// Interned string pointer.
    Str,
    /// Raw pointer into the region.
    Pointer,
    /// Block descriptor.
    Block,
}

impl ValueKind {
    /// In-memory width of a value of this kind, in bytes.
    ///
    /// This is the span written by a typed copy and zeroed by local
    /// initialisation, not the cell width.
    #[must_use]
    pub const fn size_bytes(self) -> u32 {
        match self {
            Self::Bool => 1,
            Self::Int | Self::UInt | Self::Float | Self::Str | Self::Pointer => 4,
            Self::Int64 | Self::UInt64 | Self::Int2 | Self::UInt2 | Self::Float2
            | Self::Range | Self::URange => 8,
            Self::Int3 | Self::UInt3 | Self::Float3 => 12,
            Self::Int4 | Self::UInt4 | Self::Float4 | Self::Block => 16,
        }
    }

    /// Short lower-case name used by diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float => "float",
            Self::Int2 => "int2",
            Self::Int3 => "int3",
            Self::Int4 => "int4",
            Self::UInt2 => "uint2",
            Self::UInt3 => "uint3",
            Self::UInt4 => "uint4",
            Self::Float2 => "float2",
            Self::Float3 => "float3",
            Self::Float4 => "float4",
            Self::Range => "range",
            Self::URange => "urange",
            Self::Str => "string",
            Self::Pointer => "pointer",
            Self::Block => "block",
        }
    }
}

/// 2-lane signed integer vector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Int2 {
    /// First lane.
    pub x: i32,
    /// Second lane.
    pub y: i32,
}

/// 3-lane signed integer vector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Int3 {
    /// First lane.
    pub x: i32,
    /// Second lane.
    pub y: i32,
    /// Third lane.
    pub z: i32,
}

/// 4-lane signed integer vector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Int4 {
    /// First lane.
    pub x: i32,
    /// Second lane.
    pub y: i32,
    /// Third lane.
    pub z: i32,
    /// Fourth lane.
    pub w: i32,
}

/// 2-lane unsigned integer vector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UInt2 {
    /// First lane.
    pub x: u32,
    /// Second lane.
    pub y: u32,
}

/// 3-lane unsigned integer vector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UInt3 {
    /// First lane.
    pub x: u32,
    /// Second lane.
    pub y: u32,
    /// Third lane.
    pub z: u32,
}

/// 4-lane unsigned integer vector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UInt4 {
    /// First lane.
    pub x: u32,
    /// Second lane.
    pub y: u32,
    /// Third lane.
    pub z: u32,
    /// Fourth lane.
    pub w: u32,
}

/// 2-lane float vector.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Float2 {
    /// First lane.
    pub x: f32,
    /// Second lane.
    pub y: f32,
}

/// 3-lane float vector.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Float3 {
    /// First lane.
    pub x: f32,
    /// Second lane.
    pub y: f32,
    /// Third lane.
    pub z: f32,
}

/// 4-lane float vector.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Float4 {
    /// First lane.
    pub x: f32,
    /// Second lane.
    pub y: f32,
    /// Third lane.
    pub z: f32,
    /// Fourth lane.
    pub w: f32,
}

/// Signed half-open range `[from, to)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Range {
    /// Inclusive lower bound.
    pub from: i32,
    /// Exclusive upper bound.
    pub to: i32,
}

/// Unsigned half-open range `[from, to)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct URange {
    /// Inclusive lower bound.
    pub from: u32,
    /// Exclusive upper bound.
    pub to: u32,
}

impl CellCast for bool {
    fn from_cell(cell: Cell) -> Self {
        cell.to_bytes()[0] != 0
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.bytes[0] = u8::from(self);
        c
    }
}

impl CellCast for i32 {
    fn from_cell(cell: Cell) -> Self {
        cell.i32_lane(0)
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_i32_lane(0, self);
        c
    }
}

impl CellCast for u32 {
    fn from_cell(cell: Cell) -> Self {
        cell.u32_lane(0)
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_u32_lane(0, self);
        c
    }
}

impl CellCast for i64 {
    fn from_cell(cell: Cell) -> Self {
        cell.u64_pair(0) as i64
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_u64_pair(0, self as u64);
        c
    }
}

impl CellCast for u64 {
    fn from_cell(cell: Cell) -> Self {
        cell.u64_pair(0)
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_u64_pair(0, self);
        c
    }
}

impl CellCast for f32 {
    fn from_cell(cell: Cell) -> Self {
        cell.f32_lane(0)
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_f32_lane(0, self);
        c
    }
}

impl CellCast for Ptr {
    fn from_cell(cell: Cell) -> Self {
        Self(cell.u32_lane(0))
    }

    fn into_cell(self) -> Cell {
        self.0.into_cell()
    }
}

impl CellCast for StrRef {
    fn from_cell(cell: Cell) -> Self {
        Self(cell.u32_lane(0))
    }

    fn into_cell(self) -> Cell {
        self.0.into_cell()
    }
}

impl CellCast for Int2 {
    fn from_cell(cell: Cell) -> Self {
        Self { x: cell.i32_lane(0), y: cell.i32_lane(1) }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_i32_lane(0, self.x);
        c.set_i32_lane(1, self.y);
        c
    }
}

impl CellCast for Int3 {
    fn from_cell(cell: Cell) -> Self {
        Self { x: cell.i32_lane(0), y: cell.i32_lane(1), z: cell.i32_lane(2) }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_i32_lane(0, self.x);
        c.set_i32_lane(1, self.y);
        c.set_i32_lane(2, self.z);
        c
    }
}

impl CellCast for Int4 {
    fn from_cell(cell: Cell) -> Self {
        Self {
            x: cell.i32_lane(0),
            y: cell.i32_lane(1),
            z: cell.i32_lane(2),
            w: cell.i32_lane(3),
        }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_i32_lane(0, self.x);
        c.set_i32_lane(1, self.y);
        c.set_i32_lane(2, self.z);
        c.set_i32_lane(3, self.w);
        c
    }
}

impl CellCast for UInt2 {
    fn from_cell(cell: Cell) -> Self {
        Self { x: cell.u32_lane(0), y: cell.u32_lane(1) }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_u32_lane(0, self.x);
        c.set_u32_lane(1, self.y);
        c
    }
}

impl CellCast for UInt3 {
    fn from_cell(cell: Cell) -> Self {
        Self { x: cell.u32_lane(0), y: cell.u32_lane(1), z: cell.u32_lane(2) }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_u32_lane(0, self.x);
        c.set_u32_lane(1, self.y);
        c.set_u32_lane(2, self.z);
        c
    }
}

impl CellCast for UInt4 {
    fn from_cell(cell: Cell) -> Self {
        Self {
            x: cell.u32_lane(0),
            y: cell.u32_lane(1),
            z: cell.u32_lane(2),
            w: cell.u32_lane(3),
        }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_u32_lane(0, self.x);
        c.set_u32_lane(1, self.y);
        c.set_u32_lane(2, self.z);
        c.set_u32_lane(3, self.w);
        c
    }
}

impl CellCast for Float2 {
    fn from_cell(cell: Cell) -> Self {
        Self { x: cell.f32_lane(0), y: cell.f32_lane(1) }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_f32_lane(0, self.x);
        c.set_f32_lane(1, self.y);
        c
    }
}

impl CellCast for Float3 {
    fn from_cell(cell: Cell) -> Self {
        Self { x: cell.f32_lane(0), y: cell.f32_lane(1), z: cell.f32_lane(2) }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_f32_lane(0, self.x);
        c.set_f32_lane(1, self.y);
        c.set_f32_lane(2, self.z);
        c
    }
}

impl CellCast for Float4 {
    fn from_cell(cell: Cell) -> Self {
        Self {
            x: cell.f32_lane(0),
            y: cell.f32_lane(1),
            z: cell.f32_lane(2),
            w: cell.f32_lane(3),
        }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_f32_lane(0, self.x);
        c.set_f32_lane(1, self.y);
        c.set_f32_lane(2, self.z);
        c.set_f32_lane(3, self.w);
        c
    }
}

impl CellCast for Range {
    fn from_cell(cell: Cell) -> Self {
        Self { from: cell.i32_lane(0), to: cell.i32_lane(1) }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_i32_lane(0, self.from);
        c.set_i32_lane(1, self.to);
        c
    }
}

impl CellCast for URange {
    fn from_cell(cell: Cell) -> Self {
        Self { from: cell.u32_lane(0), to: cell.u32_lane(1) }
    }

    fn into_cell(self) -> Cell {
        let mut c = Cell::ZERO;
        c.set_u32_lane(0, self.from);
        c.set_u32_lane(1, self.to);
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: CellCast + PartialEq + core::fmt::Debug>(value: T) {
        assert_eq!(T::from_cell(value.into_cell()), value);
    }

    #[test]
    fn cast_roundtrips() {
        roundtrip(true);
        roundtrip(false);
        roundtrip(-1i32);
        roundtrip(i32::MIN);
        roundtrip(u32::MAX);
        roundtrip(i64::MIN);
        roundtrip(u64::MAX);
        roundtrip(1.5f32);
        roundtrip(Ptr(48));
        roundtrip(StrRef(32));
        roundtrip(Int2 { x: -2, y: 7 });
        roundtrip(Int3 { x: 1, y: 2, z: 3 });
        roundtrip(Int4 { x: 1, y: -2, z: 3, w: -4 });
        roundtrip(UInt2 { x: 0, y: u32::MAX });
        roundtrip(UInt3 { x: 9, y: 8, z: 7 });
        roundtrip(UInt4 { x: 1, y: 2, z: 3, w: 4 });
        roundtrip(Float2 { x: 0.5, y: -0.5 });
        roundtrip(Float3 { x: 1.0, y: 2.0, z: 3.0 });
        roundtrip(Float4 { x: 1.0, y: 2.0, z: 3.0, w: 4.0 });
        roundtrip(Range { from: -3, to: 11 });
        roundtrip(URange { from: 0, to: 10 });
    }

    #[test]
    fn unused_lanes_are_zero() {
        let c = 7i32.into_cell();
        assert_eq!(c.u32_lane(1), 0);
        assert_eq!(c.u32_lane(2), 0);
        assert_eq!(c.u32_lane(3), 0);

        let c = true.into_cell();
        assert_eq!(c.u32_lane(0), 1);
        assert_eq!(c.u64_pair(1), 0);
    }

    #[test]
    fn pointer_and_string_alias() {
        let p = Ptr(64).into_cell();
        assert_eq!(StrRef::from_cell(p), StrRef(64));
        assert!(Ptr::from_cell(Cell::ZERO).is_null());
        assert!(StrRef::from_cell(Cell::ZERO).is_null());
    }

    #[test]
    fn value_kind_widths() {
        assert_eq!(ValueKind::Bool.size_bytes(), 1);
        assert_eq!(ValueKind::Int.size_bytes(), 4);
        assert_eq!(ValueKind::Int64.size_bytes(), 8);
        assert_eq!(ValueKind::Float3.size_bytes(), 12);
        assert_eq!(ValueKind::Block.size_bytes(), 16);
    }
}
