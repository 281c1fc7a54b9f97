//! Positional cursor over a byte slice.
//!
//! Every accessor is bounds checked and big-endian. A failed read or write
//! returns [`ProtocolError::NotEnough`] and leaves the cursor untouched.

use crate::error::ProtocolError;

/// Cursor over `T`, readable when `T: AsRef<[u8]>`, writable when
/// `T: AsMut<[u8]>`.
#[derive(Debug, Clone)]
pub struct Buffer<T> {
    pos: usize,
    data: T,
}

impl<T: AsRef<[u8]>> Buffer<T> {
    pub fn new(data: T) -> Self {
        Self { pos: 0, data }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<(), ProtocolError> {
        if pos > self.len() {
            return Err(ProtocolError::NotEnough);
        }
        self.pos = pos;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.len() - self.pos
    }

    pub fn into_inner(self) -> T {
        self.data
    }

    fn check(&self, n: usize) -> Result<(), ProtocolError> {
        if self.remaining() < n {
            Err(ProtocolError::NotEnough)
        } else {
            Ok(())
        }
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        self.check(1)?;
        let v = self.data.as_ref()[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        self.check(2)?;
        let b = &self.data.as_ref()[self.pos..self.pos + 2];
        let v = u16::from_be_bytes([b[0], b[1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        self.check(4)?;
        let b = &self.data.as_ref()[self.pos..self.pos + 4];
        let v = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        self.pos += 4;
        Ok(v)
    }

    /// Borrows the next `n` bytes and advances past them.
    pub fn get_bytes(&mut self, n: usize) -> Result<&[u8], ProtocolError> {
        self.check(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.data.as_ref()[start..start + n])
    }

    /// Copies `dst.len()` bytes into `dst`.
    pub fn copy_to(&mut self, dst: &mut [u8]) -> Result<(), ProtocolError> {
        let src = self.get_bytes(dst.len())?;
        dst.copy_from_slice(src);
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.check(n)?;
        self.pos += n;
        Ok(())
    }
}

impl<'a> Buffer<&'a [u8]> {
    /// Like [`Buffer::get_bytes`] but borrows from the underlying slice.
    pub fn get_slice(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.check(n)?;
        let data: &'a [u8] = self.data;
        let start = self.pos;
        self.pos += n;
        Ok(&data[start..start + n])
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Buffer<T> {
    pub fn put_u8(&mut self, v: u8) -> Result<(), ProtocolError> {
        self.put_bytes(&[v])
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), ProtocolError> {
        self.put_bytes(&v.to_be_bytes())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), ProtocolError> {
        self.put_bytes(&v.to_be_bytes())
    }

    pub fn put_bytes(&mut self, src: &[u8]) -> Result<(), ProtocolError> {
        self.check(src.len())?;
        let start = self.pos;
        self.data.as_mut()[start..start + src.len()].copy_from_slice(src);
        self.pos += src.len();
        Ok(())
    }

    /// Writes the IEEE CRC32 of everything before the cursor.
    pub fn put_crc32(&mut self) -> Result<(), ProtocolError> {
        self.check(4)?;
        let sum = crc32fast::hash(&self.data.as_ref()[..self.pos]);
        self.put_u32(sum)
    }
}
