//! The buffer codec: values are packed back to back as JSON documents and unpacked in the same
//! order. Running out of documents is reported as [`PmixError::UnpackPastEnd`], which streamed
//! decoders treat as the natural end of their input.
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Deserializer;

use crate::error::{PmixError, Result};

/// A byte buffer with a read cursor.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Buffer {
    bytes: Vec<u8>,
    // read offset into `bytes`
    pos: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Buffer::default()
    }

    /// wraps received bytes for unpacking
    pub fn load(bytes: Vec<u8>) -> Self {
        Buffer { bytes, pos: 0 }
    }

    /// gives up the packed bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// number of bytes not yet unpacked
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// appends one value
    pub fn pack<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer(&mut self.bytes, value)?;
        // bare numbers would run together without a separator
        self.bytes.push(b'\n');
        Ok(())
    }

    /// appends every element of `values`, one after the other
    pub fn pack_array<T: Serialize>(&mut self, values: &[T]) -> Result<()> {
        for v in values {
            self.pack(v)?;
        }
        Ok(())
    }

    /// unpacks the next value
    ///
    /// # Errors
    /// `UnpackPastEnd` once the buffer is exhausted, `UnpackFailure` if the next value does not
    /// decode as a `T`
    pub fn unpack<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut stream = Deserializer::from_slice(&self.bytes[self.pos..]).into_iter::<T>();
        match stream.next() {
            None => Err(PmixError::UnpackPastEnd),
            Some(Ok(value)) => {
                self.pos += stream.byte_offset();
                Ok(value)
            }
            Some(Err(e)) if e.is_eof() => Err(PmixError::UnpackPastEnd),
            Some(Err(e)) => Err(PmixError::UnpackFailure(e.to_string())),
        }
    }

    /// unpacks exactly `count` values
    ///
    /// # Errors
    /// `UnpackFailure` if the buffer cannot hold `count` more values, otherwise as [`Buffer::unpack`]
    pub fn unpack_array<T: DeserializeOwned>(&mut self, count: usize) -> Result<Vec<T>> {
        // a packed value takes at least one byte plus its separator
        let room = self.remaining() / 2;
        if count > room {
            return Err(PmixError::UnpackFailure(format!(
                "{} values announced, room for at most {}",
                count, room
            )));
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.unpack()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Kval;

    #[test]
    fn unpacks_in_pack_order() {
        let mut buf = Buffer::new();
        buf.pack(&7_i32).unwrap();
        buf.pack(&2_usize).unwrap();
        buf.pack_array(&[Kval::new("a", 1u32), Kval::new("b", "x")]).unwrap();

        let mut buf = Buffer::load(buf.into_bytes());
        assert_eq!(buf.unpack::<i32>().unwrap(), 7);
        let n: usize = buf.unpack().unwrap();
        let kvs: Vec<Kval> = buf.unpack_array(n).unwrap();
        assert_eq!(kvs[1], Kval::new("b", "x"));
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn exhausted_buffer_reports_past_end() {
        let mut buf = Buffer::new();
        buf.pack(&1_u32).unwrap();
        let mut buf = Buffer::load(buf.into_bytes());
        buf.unpack::<u32>().unwrap();
        assert!(matches!(buf.unpack::<u32>(), Err(PmixError::UnpackPastEnd)));
        assert!(matches!(Buffer::new().unpack::<u32>(), Err(PmixError::UnpackPastEnd)));
    }

    #[test]
    fn oversized_count_is_a_failure() {
        let mut buf = Buffer::new();
        buf.pack(&usize::MAX).unwrap();
        buf.pack(&1_u32).unwrap();
        let mut buf = Buffer::load(buf.into_bytes());
        let n: usize = buf.unpack().unwrap();
        assert!(matches!(buf.unpack_array::<u32>(n), Err(PmixError::UnpackFailure(_))));
        assert!(matches!(
            buf.unpack_array::<crate::types::Proc>(1 << 40),
            Err(PmixError::UnpackFailure(_))
        ));
        // nothing was consumed
        assert_eq!(buf.unpack::<u32>().unwrap(), 1);
    }

    #[test]
    fn wrong_type_is_a_failure() {
        let mut buf = Buffer::new();
        buf.pack("text").unwrap();
        let mut buf = Buffer::load(buf.into_bytes());
        assert!(matches!(buf.unpack::<u32>(), Err(PmixError::UnpackFailure(_))));
    }
}
