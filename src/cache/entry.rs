//! Cache Entry Module
//!
//! Fixed-size byte buffer for one cached payload. Population appends through a
//! write cursor; replay goes through an independent [`EntryCursor`].

use std::io::{self, Read, Seek, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::error::{CacheError, Result};

/// Declared length of an entry whose headers were never probed.
pub const UNPROBED: i64 = -1;

// == Entry Buffer ==
/// Byte store for one cached item.
///
/// `declared_length` is `-1` until probed, `0` when known to be uncacheable and
/// the expected byte count otherwise. Once `written() == declared_length` the
/// bytes are frozen and can be shared by any number of readers.
#[derive(Debug, Clone)]
pub struct EntryBuffer {
    declared_length: i64,
    filling: BytesMut,
    sealed: Option<Bytes>,
}

impl Default for EntryBuffer {
    fn default() -> Self {
        Self::unprobed()
    }
}

impl EntryBuffer {
    // == Constructors ==
    /// Creates a buffer with no declared length.
    pub fn unprobed() -> Self {
        Self {
            declared_length: UNPROBED,
            filling: BytesMut::new(),
            sealed: None,
        }
    }

    /// Creates a buffer marked as known-uncacheable.
    pub fn uncacheable() -> Self {
        Self {
            declared_length: 0,
            ..Self::unprobed()
        }
    }

    /// Allocates room for exactly `declared_length` bytes.
    pub fn allocate(declared_length: i64) -> Self {
        if declared_length <= 0 {
            return Self::uncacheable();
        }
        Self {
            declared_length,
            filling: BytesMut::with_capacity(declared_length as usize),
            sealed: None,
        }
    }

    // == Accessors ==
    pub fn declared_length(&self) -> i64 {
        self.declared_length
    }

    /// Bytes copied in so far.
    pub fn written(&self) -> usize {
        match &self.sealed {
            Some(bytes) => bytes.len(),
            None => self.filling.len(),
        }
    }

    /// Bytes still missing before the buffer is complete.
    pub fn remaining(&self) -> usize {
        (self.declared_length.max(0) as usize).saturating_sub(self.written())
    }

    /// True once every declared byte has been written.
    pub fn is_valid(&self) -> bool {
        let written = self.written();
        written > 0 && written as i64 == self.declared_length
    }

    // == Populate ==
    /// Appends `bytes` at the write cursor, clipped to the remaining capacity.
    ///
    /// Returns how many bytes were stored.
    pub fn populate(&mut self, bytes: &[u8]) -> usize {
        if self.sealed.is_some() {
            return 0;
        }
        let n = bytes.len().min(self.remaining());
        if n == 0 {
            return 0;
        }
        self.filling.extend_from_slice(&bytes[..n]);
        if self.filling.len() as i64 == self.declared_length {
            self.sealed = Some(std::mem::take(&mut self.filling).freeze());
        }
        n
    }

    // == Cursor ==
    /// Returns a replay cursor over the buffer if it is valid.
    pub fn cursor(&self) -> Option<EntryCursor> {
        self.sealed
            .as_ref()
            .map(|bytes| EntryCursor::new(bytes.clone(), self.declared_length))
    }
}

// == Entry Cursor ==
/// Read/seek view over a completed entry. Each reader owns its own offset.
#[derive(Debug, Clone)]
pub struct EntryCursor {
    data: Bytes,
    declared_length: i64,
    offset: i64,
}

impl EntryCursor {
    pub fn new(data: Bytes, declared_length: i64) -> Self {
        Self {
            data,
            declared_length,
            offset: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.declared_length.max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> i64 {
        self.offset
    }

    /// Copies into `dst` from the current offset and advances it.
    ///
    /// Fails with `Uninitialized` when no length is declared and with `Overrun`
    /// when `dst` reaches past the declared length. A short copy advances the
    /// offset by the copied amount and reports `ShortRead`.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<usize> {
        if self.declared_length <= 0 {
            return Err(CacheError::Uninitialized);
        }
        if dst.is_empty() {
            return Ok(0);
        }
        let end = self.offset.checked_add(dst.len() as i64).unwrap_or(i64::MAX);
        if self.offset < 0 || end > self.declared_length {
            return Err(CacheError::Overrun {
                declared: self.declared_length,
                end,
            });
        }
        let start = (self.offset as usize).min(self.data.len());
        let stop = (end as usize).min(self.data.len());
        let copied = stop - start;
        dst[..copied].copy_from_slice(&self.data[start..stop]);
        self.offset += copied as i64;
        if copied != dst.len() {
            return Err(CacheError::ShortRead {
                copied,
                requested: dst.len(),
            });
        }
        Ok(copied)
    }

    fn seek_to(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset).ok(),
            SeekFrom::Current(delta) => self.offset.checked_add(delta),
            SeekFrom::End(delta) => self.declared_length.checked_add(delta),
        };
        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek offset overflows entry position",
            ));
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of entry",
            ));
        }
        self.offset = target;
        Ok(target as u64)
    }
}

impl Read for EntryCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_into(buf).map_err(io::Error::from)
    }
}

impl Seek for EntryCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek_to(pos)
    }
}

impl AsyncRead for EntryCursor {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = self.read_into(buf.initialize_unfilled())?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for EntryCursor {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        self.seek_to(position).map(|_| ())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.offset.max(0) as u64))
    }
}
