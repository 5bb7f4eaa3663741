//! Fixed-size frames exchanged between render ranks and the coordinator.
//!
//! Every frame is three little-endian `u32` words `[tag, a, b]`:
//! a work request is `[TAG_WORK, rank, 0]`, a reply `[TAG_WORK, start, end]`,
//! and the first frame on a stream connection is `[TAG_HELLO, rank, 0]`.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::error::ClusterError;

pub const TAG_WORK: u32 = 1;
pub const TAG_HELLO: u32 = 2;

/// Size of one encoded frame in bytes.
pub const FRAME_BYTES: usize = std::mem::size_of::<Frame>();

/// A range of flat assignment indices. Empty means "no more work".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkRange {
    pub start: usize,
    pub end: usize,
}

impl WorkRange {
    pub const EMPTY: WorkRange = WorkRange { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl From<Range<usize>> for WorkRange {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Frame {
    pub tag: u32,
    pub a: u32,
    pub b: u32,
}

impl Frame {
    pub fn hello(rank: usize) -> Result<Self, ClusterError> {
        Ok(Self {
            tag: TAG_HELLO,
            a: to_word(rank)?,
            b: 0,
        })
    }

    pub fn request(rank: usize) -> Result<Self, ClusterError> {
        Ok(Self {
            tag: TAG_WORK,
            a: to_word(rank)?,
            b: 0,
        })
    }

    pub fn reply(range: WorkRange) -> Result<Self, ClusterError> {
        Ok(Self {
            tag: TAG_WORK,
            a: to_word(range.start)?,
            b: to_word(range.end)?,
        })
    }

    pub fn into_hello(self) -> Result<usize, ClusterError> {
        self.expect_tag(TAG_HELLO)?;
        Ok(self.a as usize)
    }

    pub fn into_request(self) -> Result<usize, ClusterError> {
        self.expect_tag(TAG_WORK)?;
        Ok(self.a as usize)
    }

    pub fn into_reply(self) -> Result<WorkRange, ClusterError> {
        self.expect_tag(TAG_WORK)?;
        if self.b < self.a {
            return Err(ClusterError::Protocol(format!(
                "inverted work range [{}, {})",
                self.a, self.b
            )));
        }
        Ok(WorkRange::new(self.a as usize, self.b as usize))
    }

    pub fn to_bytes(self) -> [u8; FRAME_BYTES] {
        let words = [self.tag.to_le(), self.a.to_le(), self.b.to_le()];
        bytemuck::cast(words)
    }

    pub fn from_bytes(bytes: [u8; FRAME_BYTES]) -> Self {
        let [tag, a, b]: [u32; 3] = bytemuck::cast(bytes);
        Self {
            tag: u32::from_le(tag),
            a: u32::from_le(a),
            b: u32::from_le(b),
        }
    }

    fn expect_tag(&self, tag: u32) -> Result<(), ClusterError> {
        if self.tag == tag {
            Ok(())
        } else {
            Err(ClusterError::Protocol(format!(
                "expected tag {tag}, got {}",
                self.tag
            )))
        }
    }
}

fn to_word(value: usize) -> Result<u32, ClusterError> {
    u32::try_from(value)
        .map_err(|_| ClusterError::Protocol(format!("{value} does not fit in a wire word")))
}
