//! Enumerations shared by every adapter and by both foreign boundaries.
//!
//! The discriminants are the values used on the C side, so each enum can be
//! converted from a raw integer with `num_enum`.

use std::fmt;

/// Kind of a simulation object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, num_enum::TryFromPrimitive)]
#[repr(i32)]
pub enum GpiObjType {
    Unknown = 0,
    Memory = 1,
    Module = 2,
    Array = 6,
    Enum = 7,
    Structure = 8,
    Real = 9,
    Integer = 10,
    String = 11,
    GenArray = 12,
    Package = 13,
    PackedStructure = 14,
    Logic = 15,
    LogicArray = 16,
}

impl GpiObjType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpiObjType::Unknown => "GPI_UNKNOWN",
            GpiObjType::Memory => "GPI_MEMORY",
            GpiObjType::Module => "GPI_MODULE",
            GpiObjType::Array => "GPI_ARRAY",
            GpiObjType::Enum => "GPI_ENUM",
            GpiObjType::Structure => "GPI_STRUCTURE",
            GpiObjType::Real => "GPI_REAL",
            GpiObjType::Integer => "GPI_INTEGER",
            GpiObjType::String => "GPI_STRING",
            GpiObjType::GenArray => "GPI_GENARRAY",
            GpiObjType::Package => "GPI_PACKAGE",
            GpiObjType::PackedStructure => "GPI_PACKED_STRUCTURE",
            GpiObjType::Logic => "GPI_LOGIC",
            GpiObjType::LogicArray => "GPI_LOGIC_ARRAY",
        }
    }
}

impl fmt::Display for GpiObjType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation walked by an iterator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(i32)]
pub enum GpiIteratorSel {
    Objects = 1,
    Drivers = 2,
    Loads = 3,
    PackageScopes = 4,
}

/// How a value write is applied by the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(i32)]
pub enum GpiSetAction {
    Deposit = 0,
    Force = 1,
    Release = 2,
    NoDelay = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(i32)]
pub enum GpiRangeDir {
    Down = -1,
    NoDir = 0,
    Up = 1,
}

/// Edge filter of a value-change callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(i32)]
pub enum GpiEdge {
    /// Signal settled to `1`
    Rising = 0,
    /// Signal settled to `0`
    Falling = 1,
    /// Either `Rising` or `Falling`
    Edge = 2,
    /// Any change of value, including `X`/`Z` transitions and vectors
    ValueChange = 3,
}

impl GpiEdge {
    /// Whether a change to `new_binstr` wakes a callback filtered on this edge.
    #[inline(always)]
    pub fn accepts(&self, new_binstr: &str) -> bool {
        match self {
            GpiEdge::Rising => new_binstr == "1",
            GpiEdge::Falling => new_binstr == "0",
            GpiEdge::Edge => new_binstr == "1" || new_binstr == "0",
            GpiEdge::ValueChange => true,
        }
    }
}

/// Severity of an event surfaced to the user runtime's event sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(i32)]
pub enum GpiEvent {
    SimFail = 0,
    SimInfo = 1,
    SimTestFail = 2,
}

/// Callback trigger classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Timed,
    ValueChange,
    ReadOnly,
    NextTime,
    ReadWrite,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallbackKind::Timed => "timed",
            CallbackKind::ValueChange => "value_change",
            CallbackKind::ReadOnly => "readonly",
            CallbackKind::NextTime => "nexttime",
            CallbackKind::ReadWrite => "readwrite",
        };
        f.write_str(s)
    }
}
