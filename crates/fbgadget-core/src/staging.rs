//! Staging buffer shared by download, upload, flash and boot.
//!
//! The engine only tracks byte counters into it; collaborators read the
//! downloaded prefix and may write replies for a later upload.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StagingError {
    #[error("range {offset}+{len} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

#[derive(Debug)]
pub struct StagingBuffer {
    data: Vec<u8>,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), StagingError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(StagingError::OutOfBounds {
                offset,
                len,
                capacity: self.data.len(),
            }),
        }
    }

    /// Copy `bytes` in at `offset`.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StagingError> {
        self.check(offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8], StagingError> {
        self.check(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    /// Borrow the first `len` bytes.
    pub fn prefix(&self, len: usize) -> Result<&[u8], StagingError> {
        self.read(0, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let mut buf = StagingBuffer::new(16);
        buf.write_at(4, b"abcd").unwrap();
        assert_eq!(buf.read(4, 4).unwrap(), b"abcd");
        assert_eq!(buf.prefix(5).unwrap(), &[0, 0, 0, 0, b'a']);
    }

    #[test]
    fn test_bounds_are_checked() {
        let mut buf = StagingBuffer::new(8);
        assert_eq!(
            buf.write_at(6, b"abc"),
            Err(StagingError::OutOfBounds {
                offset: 6,
                len: 3,
                capacity: 8
            })
        );
        assert!(buf.read(usize::MAX, 2).is_err());
        assert!(buf.prefix(8).is_ok());
        assert!(buf.prefix(9).is_err());
    }
}
