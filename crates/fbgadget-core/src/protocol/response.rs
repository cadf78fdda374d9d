//! Response frames.
//!
//! Every command is answered with one `OKAY<info>`, `FAIL<reason>` or
//! `DATA<size>` frame. Frames are bounded by [`FASTBOOT_RESPONSE_LEN`];
//! anything that does not fit is an error, never a truncation.

use std::fmt;

use thiserror::Error;

use super::constants::{FASTBOOT_RESPONSE_LEN, RESPONSE_DATA, RESPONSE_FAIL, RESPONSE_OKAY};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("Response needs {needed} bytes, capacity is {capacity}")]
    Overflow { needed: usize, capacity: usize },
}

/// Fixed-capacity response frame with checked appends.
#[derive(Clone)]
pub struct ResponseBuffer {
    data: [u8; FASTBOOT_RESPONSE_LEN],
    len: usize,
}

impl ResponseBuffer {
    pub const CAPACITY: usize = FASTBOOT_RESPONSE_LEN;

    pub fn new() -> Self {
        Self {
            data: [0; FASTBOOT_RESPONSE_LEN],
            len: 0,
        }
    }

    /// Append `text`, failing without modification if it does not fit.
    pub fn push_str(&mut self, text: &str) -> Result<(), ResponseError> {
        let needed = self.len + text.len();
        if needed > Self::CAPACITY {
            return Err(ResponseError::Overflow {
                needed,
                capacity: Self::CAPACITY,
            });
        }
        self.data[self.len..needed].copy_from_slice(text.as_bytes());
        self.len = needed;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        Self::CAPACITY - self.len
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResponseBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseBuffer({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// A single status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command succeeded, optionally with an informational value.
    Okay(String),
    /// Command failed with a reason.
    Fail(String),
    /// Ready for a data phase of the given size.
    Data(u32),
}

impl Response {
    pub fn okay() -> Self {
        Response::Okay(String::new())
    }

    pub fn okay_with(info: impl Into<String>) -> Self {
        Response::Okay(info.into())
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Response::Fail(reason.into())
    }

    /// Encode into a bounded frame.
    pub fn encode(&self) -> Result<ResponseBuffer, ResponseError> {
        let mut buf = ResponseBuffer::new();
        match self {
            Response::Okay(info) => {
                buf.push_str(RESPONSE_OKAY)?;
                buf.push_str(info)?;
            }
            Response::Fail(reason) => {
                buf.push_str(RESPONSE_FAIL)?;
                buf.push_str(reason)?;
            }
            Response::Data(size) => {
                buf.push_str(RESPONSE_DATA)?;
                buf.push_str(&format!("{size:08x}"))?;
            }
        }
        Ok(buf)
    }

    /// Parse a frame as seen by the host.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(frame).ok()?;
        if let Some(info) = text.strip_prefix(RESPONSE_OKAY) {
            return Some(Response::Okay(info.to_string()));
        }
        if let Some(reason) = text.strip_prefix(RESPONSE_FAIL) {
            return Some(Response::Fail(reason.to_string()));
        }
        let digits = text.strip_prefix(RESPONSE_DATA)?;
        if digits.len() != 8 {
            return None;
        }
        u32::from_str_radix(digits, 16).ok().map(Response::Data)
    }

    pub fn is_okay(&self) -> bool {
        matches!(self, Response::Okay(_))
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Response::Fail(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Okay(info) => write!(f, "{RESPONSE_OKAY}{info}"),
            Response::Fail(reason) => write!(f, "{RESPONSE_FAIL}{reason}"),
            Response::Data(size) => write!(f, "{RESPONSE_DATA}{size:08x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_frame_width() {
        let frame = Response::Data(0x10).encode().unwrap();
        assert_eq!(frame.as_bytes(), b"DATA00000010");
    }

    #[test]
    fn test_overflow_is_an_error() {
        let long = "x".repeat(FASTBOOT_RESPONSE_LEN);
        let err = Response::okay_with(long).encode().unwrap_err();
        assert_eq!(
            err,
            ResponseError::Overflow {
                needed: FASTBOOT_RESPONSE_LEN + 4,
                capacity: FASTBOOT_RESPONSE_LEN
            }
        );
    }

    #[test]
    fn test_push_str_leaves_buffer_untouched_on_overflow() {
        let mut buf = ResponseBuffer::new();
        buf.push_str("OKAY").unwrap();
        assert!(buf.push_str(&"y".repeat(buf.remaining() + 1)).is_err());
        assert_eq!(buf.as_bytes(), b"OKAY");
        buf.push_str(&"y".repeat(buf.remaining())).unwrap();
        assert_eq!(buf.len(), ResponseBuffer::CAPACITY);
    }

    #[test]
    fn test_parse_host_frames() {
        assert_eq!(Response::parse(b"OKAY0.4"), Some(Response::okay_with("0.4")));
        assert_eq!(
            Response::parse(b"FAILunknown command"),
            Some(Response::fail("unknown command"))
        );
        assert_eq!(Response::parse(b"DATA0000abcd"), Some(Response::Data(0xabcd)));
        assert_eq!(Response::parse(b"DATA12"), None);
        assert_eq!(Response::parse(b"INFOhello"), None);
    }
}
