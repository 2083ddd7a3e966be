use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ir::{truncate, FloatKind, Type};

/// Runtime value of the reference executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Val {
    // Scalars
    /// Integer of the given width, stored zero-extended
    Int {
        /// Bit width
        bits: u32,
        /// Value truncated to `bits`
        value: u64,
    },
    /// Address into executor memory
    Ptr(u64),
    /// IEEE float kept as its bit pattern
    Float(FloatKind, u64),

    // Compound
    /// Struct, array or vector lanes
    Agg(Vec<Val>),

    // Special
    /// Undefined value; reads as zero
    Undef,
    /// Landing pad token
    Token,
}

impl Val {
    pub fn int(bits: u32, value: u64) -> Self {
        Val::Int {
            bits,
            value: truncate(value, bits),
        }
    }

    pub fn bool(b: bool) -> Self {
        Val::int(1, u64::from(b))
    }

    /// All-zero value of `ty`, `None` for `void`.
    pub fn zero(ty: &Type) -> Option<Self> {
        Some(match ty {
            Type::Void => return None,
            Type::Int(bits) => Val::int(*bits, 0),
            Type::Float(kind) => Val::Float(*kind, 0),
            Type::Ptr(_) => Val::Ptr(0),
            Type::Vector(elem, lanes) => {
                Val::Agg(vec![Val::zero(elem).unwrap_or(Val::Undef); *lanes as usize])
            }
            Type::Array(elem, len) => {
                Val::Agg(vec![Val::zero(elem).unwrap_or(Val::Undef); *len as usize])
            }
            Type::Struct(fields) => Val::Agg(
                fields
                    .iter()
                    .map(|f| Val::zero(f).unwrap_or(Val::Undef))
                    .collect(),
            ),
            Type::Token => Val::Token,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Int { .. } => "int",
            Val::Ptr(_) => "ptr",
            Val::Float(..) => "float",
            Val::Agg(_) => "aggregate",
            Val::Undef => "undef",
            Val::Token => "token",
        }
    }

    /// Raw scalar bits. Undef reads as zero.
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Val::Int { value, .. } => Ok(*value),
            Val::Ptr(addr) => Ok(*addr),
            Val::Float(_, bits) => Ok(*bits),
            Val::Undef => Ok(0),
            _ => Err(Error::execution(format!(
                "expected scalar, got {}",
                self.type_name()
            ))),
        }
    }

    /// Scalar sign-extended from its own width.
    pub fn as_i64(&self) -> Result<i64> {
        let raw = self.as_u64()?;
        Ok(match self {
            Val::Int { bits, .. } => sign_extend(raw, *bits),
            _ => raw as i64,
        })
    }

    pub fn as_bool(&self) -> Result<bool> {
        Ok(self.as_u64()? & 1 == 1)
    }

    /// Bit width of a scalar as seen by comparisons.
    pub fn bits(&self) -> u32 {
        match self {
            Val::Int { bits, .. } => *bits,
            Val::Float(FloatKind::F32, _) => 32,
            _ => 64,
        }
    }

    pub fn elements(&self) -> Result<&[Val]> {
        match self {
            Val::Agg(items) => Ok(items),
            _ => Err(Error::execution(format!(
                "expected aggregate, got {}",
                self.type_name()
            ))),
        }
    }
}

pub fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Int { bits, value } => write!(f, "i{} {}", bits, value),
            Val::Ptr(addr) => write!(f, "ptr {:#x}", addr),
            Val::Float(FloatKind::F32, bits) => write!(f, "f32 {}", f32::from_bits(*bits as u32)),
            Val::Float(FloatKind::F64, bits) => write!(f, "f64 {}", f64::from_bits(*bits)),
            Val::Agg(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Val::Undef => write!(f, "undef"),
            Val::Token => write!(f, "token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_truncates() {
        assert_eq!(Val::int(8, 0x1ff), Val::Int { bits: 8, value: 0xff });
        assert_eq!(Val::int(8, 0xff).as_i64().unwrap(), -1);
        assert_eq!(Val::int(64, u64::MAX).as_i64().unwrap(), -1);
    }

    #[test]
    fn test_zero_of_struct() {
        let ty = Type::Struct(vec![Type::i32(), Type::i1()]);
        assert_eq!(
            Val::zero(&ty),
            Some(Val::Agg(vec![Val::int(32, 0), Val::bool(false)]))
        );
        assert_eq!(Val::zero(&Type::Void), None);
    }

    #[test]
    fn test_scalar_access() {
        assert_eq!(Val::Ptr(0x40).as_u64().unwrap(), 0x40);
        assert_eq!(Val::Undef.as_u64().unwrap(), 0);
        assert!(Val::Agg(vec![]).as_u64().is_err());
        assert!(Val::Token.elements().is_err());
        assert_eq!(Val::bool(true).to_string(), "i1 1");
    }
}
