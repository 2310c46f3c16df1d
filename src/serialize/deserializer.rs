use super::{SerializationError, SizeType};

type Result<T> = core::result::Result<T, SerializationError>;

/// Consumes a byte buffer produced by [`super::Serializer`].
///
/// Reads mirror the writes bit for bit: sub-byte integers unpack LSB-first,
/// byte-wide and dynamically sized reads realign to the next byte boundary.
#[derive(Debug)]
pub struct Deserializer {
    buf: Vec<u8>,
    pos: usize,
    /// Bits already consumed from `buf[pos]` (0 = aligned).
    bit: u32,
}

impl Deserializer {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0, bit: 0 }
    }

    /// `true` once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_u8(&mut self, bit_size: u32) -> Result<u8> {
        Ok(self.read_uint(bit_size.min(8))? as u8)
    }

    pub fn read_u16(&mut self, bit_size: u32) -> Result<u16> {
        Ok(self.read_uint(bit_size.min(16))? as u16)
    }

    pub fn read_u32(&mut self, bit_size: u32) -> Result<u32> {
        Ok(self.read_uint(bit_size.min(32))? as u32)
    }

    pub fn read_u64(&mut self, bit_size: u32) -> Result<u64> {
        self.read_uint(bit_size.min(64))
    }

    pub fn read_i8(&mut self, bit_size: u32) -> Result<i8> {
        Ok(self.read_int(bit_size.min(8))? as i8)
    }

    pub fn read_i16(&mut self, bit_size: u32) -> Result<i16> {
        Ok(self.read_int(bit_size.min(16))? as i16)
    }

    pub fn read_i32(&mut self, bit_size: u32) -> Result<i32> {
        Ok(self.read_int(bit_size.min(32))? as i32)
    }

    pub fn read_i64(&mut self, bit_size: u32) -> Result<i64> {
        self.read_int(bit_size.min(64))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_uint(8)? as u8 {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SerializationError::InvalidBool(other)),
        }
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| SerializationError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_length()?;
        if self.buf.len() - self.pos < len {
            return Err(SerializationError::UnexpectedEnd);
        }
        let bytes = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    pub fn begin_struct(&mut self) {}

    pub fn end_struct(&mut self) {}

    /// Returns the decoded element count.
    pub fn begin_array(&mut self) -> Result<usize> {
        self.read_length()
    }

    pub fn end_array(&mut self) {}

    /// Returns whether the optional value is present.
    pub fn begin_optional(&mut self) -> Result<bool> {
        self.read_bool()
    }

    pub fn end_optional(&mut self) {}

    /// Returns the 1-based index of the active union alternative.
    pub fn begin_union(&mut self) -> Result<SizeType> {
        self.align();
        let index = SizeType::from_le_bytes(self.read_array()?);
        if index == 0 {
            return Err(SerializationError::InvalidUnionIndex);
        }
        Ok(index)
    }

    pub fn end_union(&mut self) {}

    fn read_length(&mut self) -> Result<usize> {
        self.align();
        Ok(SizeType::from_le_bytes(self.read_array()?) as usize)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.align();
        if self.buf.len() - self.pos < N {
            return Err(SerializationError::UnexpectedEnd);
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn read_int(&mut self, bits: u32) -> Result<i64> {
        let raw = self.read_uint(bits)?;
        // Sign-extend from the serialized width.
        let shift = 64 - bits;
        Ok(((raw << shift) as i64) >> shift)
    }

    fn read_uint(&mut self, bits: u32) -> Result<u64> {
        debug_assert!(bits >= 1 && bits <= 64);
        if bits % 8 == 0 {
            self.align();
        }
        let mut out = 0u64;
        let mut got = 0;
        while got < bits {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(SerializationError::UnexpectedEnd)?;
            let avail = 8 - self.bit;
            let take = avail.min(bits - got);
            let mask = ((1u16 << take) - 1) as u8;
            out |= u64::from((byte >> self.bit) & mask) << got;
            self.bit += take;
            got += take;
            if self.bit == 8 {
                self.bit = 0;
                self.pos += 1;
            }
        }
        Ok(out)
    }

    fn align(&mut self) {
        if self.bit != 0 {
            self.bit = 0;
            self.pos += 1;
        }
    }
}
