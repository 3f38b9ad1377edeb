use byteorder::{BE, LE, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

#[derive(Debug)]
pub enum CursorError {
    Truncated {
        offset: u64,
        wanted: u64,
        available: u64,
    },
    SeekOutOfRange {
        target: u64,
        len: u64,
    },
    Io(std::io::Error),
}

impl std::fmt::Display for CursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CursorError::Truncated {
                offset,
                wanted,
                available,
            } => write!(
                f,
                "Unexpected end of stream at offset {}: wanted {} bytes, {} available",
                offset, wanted, available
            ),
            CursorError::SeekOutOfRange { target, len } => {
                write!(f, "Seek to {} is past the end of the stream ({} bytes)", target, len)
            }
            CursorError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for CursorError {}

impl From<std::io::Error> for CursorError {
    fn from(err: std::io::Error) -> Self {
        CursorError::Io(err)
    }
}

pub type CursorResult<T> = Result<T, CursorError>;

/// Bounds-checked sequential reader over an asset stream.
///
/// Every getter checks the remaining length before touching the underlying
/// reader, so a short stream is reported as [`CursorError::Truncated`] with the
/// offending offset instead of a bare `UnexpectedEof`.
pub struct BinaryCursor<R> {
    inner: R,
    position: u64,
    len: u64,
}

impl BinaryCursor<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self {
            inner: Cursor::new(bytes),
            position: 0,
            len,
        }
    }
}

impl BinaryCursor<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> CursorResult<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> BinaryCursor<R> {
    pub fn new(mut inner: R) -> CursorResult<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            position: 0,
            len,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }

    fn ensure(&self, wanted: u64) -> CursorResult<()> {
        if self.remaining() < wanted {
            return Err(CursorError::Truncated {
                offset: self.position,
                wanted,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> CursorResult<u8> {
        self.ensure(1)?;
        let value = self.inner.read_u8()?;
        self.position += 1;
        Ok(value)
    }

    pub fn i8(&mut self) -> CursorResult<i8> {
        self.ensure(1)?;
        let value = self.inner.read_i8()?;
        self.position += 1;
        Ok(value)
    }

    pub fn u16(&mut self) -> CursorResult<u16> {
        self.ensure(2)?;
        let value = self.inner.read_u16::<LE>()?;
        self.position += 2;
        Ok(value)
    }

    pub fn u32(&mut self) -> CursorResult<u32> {
        self.ensure(4)?;
        let value = self.inner.read_u32::<LE>()?;
        self.position += 4;
        Ok(value)
    }

    pub fn i32(&mut self) -> CursorResult<i32> {
        self.ensure(4)?;
        let value = self.inner.read_i32::<LE>()?;
        self.position += 4;
        Ok(value)
    }

    pub fn u16_be(&mut self) -> CursorResult<u16> {
        self.ensure(2)?;
        let value = self.inner.read_u16::<BE>()?;
        self.position += 2;
        Ok(value)
    }

    pub fn u32_be(&mut self) -> CursorResult<u32> {
        self.ensure(4)?;
        let value = self.inner.read_u32::<BE>()?;
        self.position += 4;
        Ok(value)
    }

    /// Reads a u16 (or u32 in extended mode) id, widened to u32.
    pub fn id(&mut self, extended: bool) -> CursorResult<u32> {
        if extended {
            self.u32()
        } else {
            self.u16().map(u32::from)
        }
    }

    pub fn bytes(&mut self, count: usize) -> CursorResult<Vec<u8>> {
        self.ensure(count as u64)?;
        let mut buf = vec![0; count];
        self.inner.read_exact(&mut buf)?;
        self.position += count as u64;
        Ok(buf)
    }

    /// u16 length-prefixed string, decoded lossily.
    pub fn string(&mut self) -> CursorResult<String> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    pub fn skip(&mut self, count: u64) -> CursorResult<()> {
        self.ensure(count)?;
        self.inner.seek(SeekFrom::Current(count as i64))?;
        self.position += count;
        Ok(())
    }

    pub fn seek(&mut self, target: u64) -> CursorResult<()> {
        if target > self.len {
            return Err(CursorError::SeekOutOfRange {
                target,
                len: self.len,
            });
        }
        self.inner.seek(SeekFrom::Start(target))?;
        self.position = target;
        Ok(())
    }
}
