//! Flat little-endian byte memory for the reference executor.

use crate::error::{Error, Result};

/// Addresses below this value are never handed out, so null and small
/// null-relative pointers fault.
pub const NULL_GUARD: u64 = 16;

/// A single growable address space. Allocations are bump-allocated and
/// never freed.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; NULL_GUARD as usize],
        }
    }

    /// Total bytes in use, including the null guard.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len() as u64 <= NULL_GUARD
    }

    /// Reserve `size` zeroed bytes aligned to `align` and return their address.
    pub fn allocate(&mut self, size: u64, align: u64) -> u64 {
        let align = align.max(1);
        let start = self.len().div_ceil(align) * align;
        let end = start + size.max(1);
        self.bytes.resize(end as usize, 0);
        start
    }

    fn range(&self, addr: u64, len: u64) -> Result<std::ops::Range<usize>> {
        let end = addr
            .checked_add(len)
            .ok_or_else(|| Error::execution(format!("address overflow at {:#x}", addr)))?;
        if addr < NULL_GUARD || end > self.len() {
            return Err(Error::execution(format!(
                "out-of-bounds access of {} bytes at {:#x}",
                len, addr
            )));
        }
        Ok(addr as usize..end as usize)
    }

    pub fn read_bytes(&self, addr: u64, len: u64) -> Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let range = self.range(addr, data.len() as u64)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Read an unsigned little-endian integer of `size` bytes (at most 8).
    pub fn read_uint(&self, addr: u64, size: u64) -> Result<u64> {
        if size > 8 {
            return Err(Error::execution(format!("{}-byte scalars are not supported", size)));
        }
        let mut buf = [0u8; 8];
        buf[..size as usize].copy_from_slice(self.read_bytes(addr, size)?);
        Ok(u64::from_le_bytes(buf))
    }

    /// Write the low `size` bytes of `value` (at most 8).
    pub fn write_uint(&mut self, addr: u64, size: u64, value: u64) -> Result<()> {
        if size > 8 {
            return Err(Error::execution(format!("{}-byte scalars are not supported", size)));
        }
        let bytes = value.to_le_bytes();
        self.write_bytes(addr, &bytes[..size as usize])
    }

    pub fn fill(&mut self, addr: u64, byte: u8, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let range = self.range(addr, len)?;
        self.bytes[range].fill(byte);
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap.
    pub fn copy(&mut self, dst: u64, src: u64, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let from = self.range(src, len)?;
        let to = self.range(dst, len)?;
        self.bytes.copy_within(from, to.start);
        Ok(())
    }

    /// Allocate a NUL-terminated copy of `s`.
    pub fn allocate_c_string(&mut self, s: &str) -> Result<u64> {
        let addr = self.allocate(s.len() as u64 + 1, 1);
        self.write_bytes(addr, s.as_bytes())?;
        Ok(addr)
    }

    pub fn read_c_string(&self, addr: u64) -> Result<String> {
        let start = self.range(addr, 1)?.start;
        let len = self.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::execution(format!("unterminated string at {:#x}", addr)))?;
        Ok(String::from_utf8_lossy(&self.bytes[start..start + len]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_alignment_and_zeroing() {
        let mut mem = Memory::new();
        assert!(mem.is_empty());
        let a = mem.allocate(3, 1);
        let b = mem.allocate(4, 8);
        assert_eq!(a, NULL_GUARD);
        assert_eq!(b % 8, 0);
        assert!(b >= a + 3);
        assert_eq!(mem.read_uint(b, 4).unwrap(), 0);
    }

    #[test]
    fn test_little_endian_round_trip() {
        let mut mem = Memory::new();
        let p = mem.allocate(8, 8);
        mem.write_uint(p, 4, 0xdead_beef).unwrap();
        assert_eq!(mem.read_bytes(p, 4).unwrap(), &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(mem.read_uint(p, 2).unwrap(), 0xbeef);
    }

    #[test]
    fn test_null_and_out_of_bounds_fault() {
        let mut mem = Memory::new();
        let p = mem.allocate(4, 4);
        assert!(mem.read_uint(0, 4).is_err());
        assert!(mem.write_uint(p + 2, 4, 1).is_err());
        assert!(mem.read_uint(p, 16).is_err());
        // Zero-length operations never fault.
        assert!(mem.fill(0, 0, 0).is_ok());
    }

    #[test]
    fn test_overlapping_copy() {
        let mut mem = Memory::new();
        let p = mem.allocate(6, 1);
        mem.write_bytes(p, &[1, 2, 3, 4, 5, 6]).unwrap();
        mem.copy(p + 2, p, 4).unwrap();
        assert_eq!(mem.read_bytes(p, 6).unwrap(), &[1, 2, 1, 2, 3, 4]);
        mem.fill(p, 9, 2).unwrap();
        assert_eq!(mem.read_bytes(p, 3).unwrap(), &[9, 9, 1]);
    }

    #[test]
    fn test_c_strings() {
        let mut mem = Memory::new();
        let s = mem.allocate_c_string("main").unwrap();
        assert_eq!(mem.read_c_string(s).unwrap(), "main");
    }
}
