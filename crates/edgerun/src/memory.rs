//! # Memory Accessor
//!
//! Typed read/write access to a guest's linear memory (memory index 0).
//!
//! Every write is bounds-checked before the first byte is copied, so a failed
//! write never leaves a partial mutation behind. Zero-length accesses always
//! succeed, even at addresses past the end of memory.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The module exports no linear memory.
    NoMemory { module: String },
    /// The range `[address, address + length)` falls outside the memory.
    OutOfBounds { address: u32, length: u32, size: usize },
    /// The engine refused the access.
    Engine { address: u32, length: u32, message: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMemory { module } => write!(f, "Module '{}' exports no memory", module),
            Self::OutOfBounds { address, length, size } => write!(
                f,
                "Memory access out of bounds: address {} length {} (memory size {})",
                address, length, size
            ),
            Self::Engine { address, length, message } => write!(
                f,
                "Memory access at address {} length {} failed: {}",
                address, length, message
            ),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Read/write access to the linear memory of a running module.
pub trait LinearMemory {
    /// Reads exactly `length` bytes starting at `address`.
    fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>>;

    /// Writes all of `bytes` starting at `address`, or nothing at all.
    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<()>;
}

/// Resolves `[address, address + length)` against a memory of `size` bytes.
pub fn checked_range(address: u32, length: u32, size: usize) -> Result<Range<usize>> {
    let start = address as usize;
    start
        .checked_add(length as usize)
        .filter(|end| *end <= size)
        .map(|end| start..end)
        .ok_or(Error::OutOfBounds { address, length, size })
}

/// Copies a range out of a raw memory view.
pub fn read_slice(data: &[u8], address: u32, length: u32) -> Result<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let range = checked_range(address, length, data.len())?;
    Ok(data[range].to_vec())
}

/// Copies `bytes` into a raw memory view after checking the whole range.
pub fn write_slice(data: &mut [u8], address: u32, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let length = u32::try_from(bytes.len()).map_err(|_| Error::OutOfBounds {
        address,
        length: u32::MAX,
        size: data.len(),
    })?;
    let range = checked_range(address, length, data.len())?;
    data[range].copy_from_slice(bytes);
    Ok(())
}

/// Reads a NUL-terminated byte string starting at `address`.
///
/// The terminator is not included. A string that runs off the end of memory
/// is out of bounds.
pub fn read_c_str(data: &[u8], address: u32) -> Result<&[u8]> {
    let start = address as usize;
    let tail = data.get(start..).ok_or(Error::OutOfBounds {
        address,
        length: 1,
        size: data.len(),
    })?;
    let end = tail.iter().position(|b| *b == 0).ok_or(Error::OutOfBounds {
        address,
        length: unterminated_length(tail.len()),
        size: data.len(),
    })?;
    Ok(&tail[..end])
}

/// Length reported for a string that runs off the end of memory: the rest of
/// memory plus the missing terminator, saturating at `u32::MAX`.
pub(crate) fn unterminated_length(tail: usize) -> u32 {
    u32::try_from(tail).unwrap_or(u32::MAX).saturating_add(1)
}
