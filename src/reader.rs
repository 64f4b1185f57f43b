use thiserror::Error;

/// Longest variable-length quantity allowed in a Standard MIDI File.
const MAX_VAR_LEN_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("wanted {wanted} byte(s) at offset {offset} but the buffer ended..!")]
    UnexpectedEnd { offset: usize, wanted: usize },

    #[error("variable-length value at offset {offset} is longer than 4 bytes..!")]
    VarLenTooLong { offset: usize },
}

pub type ReadResult<T> = Result<T, ReadError>;

/// Forward-only big-endian cursor over a borrowed byte slice.
///
/// Every read is bounds checked against the slice the cursor was built from, so a
/// sub-cursor made with [`ByteReader::take`] can never see past its chunk.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Absolute offset of `data[0]` in the original buffer, for error messages.
    base: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Offset in the buffer the outermost reader was created over.
    pub fn absolute_position(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(self.end(1))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> ReadResult<u16> {
        self.read_be(2).map(|v| v as u16)
    }

    pub fn read_u24(&mut self) -> ReadResult<u32> {
        self.read_be(3)
    }

    pub fn read_u32(&mut self) -> ReadResult<u32> {
        self.read_be(4)
    }

    /// Reads a MIDI variable-length quantity: 7 bits per byte, high bit set on every byte
    /// but the last, most significant group first.
    pub fn read_var_len(&mut self) -> ReadResult<u32> {
        let start = self.absolute_position();
        let mut value: u32 = 0;

        for _ in 0..MAX_VAR_LEN_BYTES {
            let byte = self.read_u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }

        Err(ReadError::VarLenTooLong { offset: start })
    }

    pub fn read_bytes(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.end(n));
        }

        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Reads `n` bytes as text, replacing invalid UTF-8, and keeps at most `max_len`
    /// bytes of it without splitting a character.
    pub fn read_string(&mut self, n: usize, max_len: usize) -> ReadResult<String> {
        let bytes = self.read_bytes(n)?;
        let mut text = String::from_utf8_lossy(bytes).into_owned();

        if text.len() > max_len {
            let end = (0..=max_len)
                .rev()
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(0);
            text.truncate(end);
        }

        Ok(text)
    }

    pub fn skip(&mut self, n: usize) -> ReadResult<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Steps back one byte; used to re-read a data byte under running status.
    pub fn back_up(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    /// Splits the next `n` bytes off into their own reader and advances past them.
    ///
    /// When fewer than `n` bytes remain the new reader gets whatever is left.
    pub fn take(&mut self, n: usize) -> ByteReader<'a> {
        let n = n.min(self.remaining());
        let sub = ByteReader {
            data: &self.data[self.pos..self.pos + n],
            pos: 0,
            base: self.absolute_position(),
        };
        self.pos += n;
        sub
    }

    fn read_be(&mut self, n: usize) -> ReadResult<u32> {
        let bytes = self.read_bytes(n)?;
        Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
    }

    fn end(&self, wanted: usize) -> ReadError {
        ReadError::UnexpectedEnd {
            offset: self.absolute_position(),
            wanted,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn var_len_values() {
        let mut r = ByteReader::new(&[0x40]);
        assert_eq!(r.read_var_len(), Ok(0x40));
        assert!(r.is_empty());

        let mut r = ByteReader::new(&[0x81, 0x80, 0x00]);
        assert_eq!(r.read_var_len(), Ok(16384));
        assert_eq!(r.position(), 3);

        let mut r = ByteReader::new(&[0xFF, 0xFF, 0xFF, 0x7F]);
        assert_eq!(r.read_var_len(), Ok(0x0FFF_FFFF));
    }

    #[test]
    fn var_len_rejects_fifth_byte() {
        let mut r = ByteReader::new(&[0x80, 0x80, 0x80, 0x80, 0x00]);
        assert_eq!(r.read_var_len(), Err(ReadError::VarLenTooLong { offset: 0 }));
    }

    #[test]
    fn var_len_truncated() {
        let mut r = ByteReader::new(&[0x81]);
        assert_eq!(
            r.read_var_len(),
            Err(ReadError::UnexpectedEnd { offset: 1, wanted: 1 })
        );
    }

    #[test]
    fn big_endian_integers() {
        let data = [0x4D, 0x54, 0x68, 0x64, 0x00, 0x06, 0x07, 0xA1, 0x20];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u32(), Ok(0x4D54_6864));
        assert_eq!(r.read_u16(), Ok(6));
        assert_eq!(r.read_u24(), Ok(500_000));
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn take_bounds_sub_reader() {
        let data = [1, 2, 3, 4, 5];
        let mut r = ByteReader::new(&data);
        r.skip(1).unwrap();

        let mut chunk = r.take(2);
        assert_eq!(r.position(), 3);
        assert_eq!(chunk.read_u16(), Ok(0x0203));
        assert_eq!(
            chunk.read_u8(),
            Err(ReadError::UnexpectedEnd { offset: 3, wanted: 1 })
        );

        let rest = r.take(10);
        assert_eq!(rest.remaining(), 2);
        assert!(r.is_empty());
    }

    #[test]
    fn back_up_rereads_byte() {
        let mut r = ByteReader::new(&[0x3C, 0x40]);
        assert_eq!(r.read_u8(), Ok(0x3C));
        r.back_up();
        assert_eq!(r.read_string(2, 2).as_deref(), Ok("<@"));
    }

    #[test]
    fn string_cut_on_char_boundary() {
        let mut r = ByteReader::new("abé".as_bytes());
        assert_eq!(r.read_string(4, 3).as_deref(), Ok("ab"));
        assert!(r.is_empty());

        // a lone lead byte decodes to U+FFFD, three bytes wide
        let mut r = ByteReader::new(&[b'a', 0xC3]);
        assert_eq!(r.read_string(2, 3).as_deref(), Ok("a"));

        let mut r = ByteReader::new(&[b'a', 0xC3]);
        assert_eq!(r.read_string(2, 4).as_deref(), Ok("a\u{FFFD}"));
    }
}
