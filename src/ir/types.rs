//! IR type system, atomic orderings and target data layout.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Floating-point kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatKind {
    F32,
    F64,
}

/// IR value types.
///
/// Pointers are opaque and only carry their address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// No value (void calls, stores, terminators).
    Void,
    /// Integer of the given bit width.
    Int(u32),
    /// IEEE float.
    Float(FloatKind),
    /// Opaque pointer in the given address space.
    Ptr(u32),
    /// Fixed-length vector of lanes.
    Vector(Box<Type>, u32),
    /// Anonymous struct.
    Struct(Vec<Type>),
    /// Fixed-length array.
    Array(Box<Type>, u64),
    /// Exception token produced by a landing pad.
    Token,
}

impl Type {
    /// Pointer in the default address space.
    pub fn ptr() -> Self {
        Type::Ptr(0)
    }

    pub fn i1() -> Self {
        Type::Int(1)
    }

    pub fn i8() -> Self {
        Type::Int(8)
    }

    pub fn i32() -> Self {
        Type::Int(32)
    }

    pub fn i64() -> Self {
        Type::Int(64)
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Address space of a pointer type.
    pub fn address_space(&self) -> Option<u32> {
        match self {
            Type::Ptr(space) => Some(*space),
            _ => None,
        }
    }

    /// Bit width of an integer type.
    pub fn int_bits(&self) -> Option<u32> {
        match self {
            Type::Int(bits) => Some(*bits),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::Float(FloatKind::F32) => write!(f, "f32"),
            Type::Float(FloatKind::F64) => write!(f, "f64"),
            Type::Ptr(0) => write!(f, "ptr"),
            Type::Ptr(space) => write!(f, "ptr addrspace({})", space),
            Type::Vector(elem, lanes) => write!(f, "<{} x {}>", lanes, elem),
            Type::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, "}}")
            }
            Type::Array(elem, len) => write!(f, "[{} x {}]", len, elem),
            Type::Token => write!(f, "token"),
        }
    }
}

/// Memory ordering for atomic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryOrdering {
    Relaxed,
    /// Accepted by the IR, rejected by the instrumenter.
    Consume,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl fmt::Display for MemoryOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryOrdering::Relaxed => "relaxed",
            MemoryOrdering::Consume => "consume",
            MemoryOrdering::Acquire => "acquire",
            MemoryOrdering::Release => "release",
            MemoryOrdering::AcqRel => "acq_rel",
            MemoryOrdering::SeqCst => "seq_cst",
        };
        f.write_str(name)
    }
}

/// Synchronization scope of an atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncScope {
    /// Only synchronizes with signal handlers on the same thread.
    SingleThread,
    #[default]
    CrossThread,
}

/// Atomic read-modify-write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtomicRmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
    FAdd,
    FSub,
}

impl fmt::Display for AtomicRmwOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AtomicRmwOp::Xchg => "xchg",
            AtomicRmwOp::Add => "add",
            AtomicRmwOp::Sub => "sub",
            AtomicRmwOp::And => "and",
            AtomicRmwOp::Nand => "nand",
            AtomicRmwOp::Or => "or",
            AtomicRmwOp::Xor => "xor",
            AtomicRmwOp::Max => "max",
            AtomicRmwOp::Min => "min",
            AtomicRmwOp::UMax => "umax",
            AtomicRmwOp::UMin => "umin",
            AtomicRmwOp::FAdd => "fadd",
            AtomicRmwOp::FSub => "fsub",
        };
        f.write_str(name)
    }
}

/// Target sizing facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLayout {
    /// Pointer width in bytes.
    pub pointer_bytes: u32,
}

impl Default for DataLayout {
    /// 32-bit embedded target.
    fn default() -> Self {
        Self { pointer_bytes: 4 }
    }
}

impl DataLayout {
    /// 64-bit host layout.
    pub fn host64() -> Self {
        Self { pointer_bytes: 8 }
    }

    /// Integer type wide enough to hold a pointer.
    pub fn int_ptr_type(&self) -> Type {
        Type::Int(self.pointer_bytes * 8)
    }

    /// Number of bytes a store of `ty` writes, `None` for unsized types.
    pub fn store_size(&self, ty: &Type) -> Option<u64> {
        match ty {
            Type::Void | Type::Token => None,
            Type::Int(bits) => Some(u64::from(*bits).div_ceil(8)),
            Type::Float(FloatKind::F32) => Some(4),
            Type::Float(FloatKind::F64) => Some(8),
            Type::Ptr(_) => Some(u64::from(self.pointer_bytes)),
            Type::Vector(elem, lanes) => {
                let bits = self.scalar_bits(elem)?;
                Some((bits * u64::from(*lanes)).div_ceil(8))
            }
            Type::Struct(_) | Type::Array(..) => self.alloc_size(ty),
        }
    }

    /// Store size rounded up to the ABI alignment.
    pub fn alloc_size(&self, ty: &Type) -> Option<u64> {
        match ty {
            Type::Struct(fields) => {
                let mut offset = 0u64;
                for field in fields {
                    let align = self.abi_align(field);
                    offset = offset.next_multiple_of(align);
                    offset += self.alloc_size(field)?;
                }
                Some(offset.next_multiple_of(self.abi_align(ty)))
            }
            Type::Array(elem, len) => Some(self.alloc_size(elem)? * len),
            _ => {
                let size = self.store_size(ty)?;
                Some(size.next_multiple_of(self.abi_align(ty)))
            }
        }
    }

    /// Byte offset of field `index` inside a struct type.
    pub fn field_offset(&self, fields: &[Type], index: usize) -> Option<u64> {
        let mut offset = 0u64;
        for (i, field) in fields.iter().enumerate() {
            offset = offset.next_multiple_of(self.abi_align(field));
            if i == index {
                return Some(offset);
            }
            offset += self.alloc_size(field)?;
        }
        None
    }

    /// Natural alignment in bytes.
    pub fn abi_align(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void | Type::Token => 1,
            Type::Int(bits) => u64::from(*bits).div_ceil(8).next_power_of_two().min(8),
            Type::Float(FloatKind::F32) => 4,
            Type::Float(FloatKind::F64) => 8,
            Type::Ptr(_) => u64::from(self.pointer_bytes),
            Type::Vector(..) => self
                .store_size(ty)
                .map_or(1, |size| size.next_power_of_two().min(16)),
            Type::Struct(fields) => fields.iter().map(|f| self.abi_align(f)).max().unwrap_or(1),
            Type::Array(elem, _) => self.abi_align(elem),
        }
    }

    fn scalar_bits(&self, ty: &Type) -> Option<u64> {
        match ty {
            Type::Int(bits) => Some(u64::from(*bits)),
            Type::Float(FloatKind::F32) => Some(32),
            Type::Float(FloatKind::F64) => Some(64),
            Type::Ptr(_) => Some(u64::from(self.pointer_bytes) * 8),
            _ => None,
        }
    }
}
