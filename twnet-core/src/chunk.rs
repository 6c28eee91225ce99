use crate::error::NetError;

pub const NET_CHUNKFLAG_VITAL: u8 = 1;
pub const NET_CHUNKFLAG_RESEND: u8 = 2;

pub const NET_MAX_SEQUENCE: u16 = 1 << 10;
pub const NET_SEQUENCE_MASK: u16 = NET_MAX_SEQUENCE - 1;

/// Largest size the 12 bit size field can carry
pub const NET_MAX_CHUNKSIZE: usize = (1 << 12) - 1;

/*
    chunk header, 2 bytes, 3 when the vital flag is set

        ffssssss  2 bit flags, high 6 bits of size
        qqssssss  high 2 bits of sequence (vital only), low 6 bits of size
        qqqqqqqq  low 8 bits of sequence (vital only)
*/

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkHeader {
    pub flags: u8,
    pub size: u16,
    /// Only meaningful when the vital flag is set
    pub sequence: u16,
}

impl ChunkHeader {
    pub fn new(flags: u8, size: u16, sequence: u16) -> Self {
        Self {
            flags,
            size,
            sequence,
        }
    }

    pub fn is_vital(&self) -> bool {
        self.flags & NET_CHUNKFLAG_VITAL != 0
    }

    pub fn packed_len(&self) -> usize {
        if self.is_vital() {
            3
        } else {
            2
        }
    }

    /// Appends the packed header to `out`
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.push(((self.flags & 0x03) << 6) | ((self.size >> 6) as u8 & 0x3f));
        let size_seq = (self.size & 0x3f) as u8;
        if self.is_vital() {
            out.push(size_seq | ((self.sequence >> 2) as u8 & 0xc0));
            out.push((self.sequence & 0xff) as u8);
        } else {
            out.push(size_seq);
        }
    }

    /// Reads a header from the front of `buf`, returning it with the number
    /// of bytes it occupied
    pub fn unpack(buf: &[u8]) -> Result<(Self, usize), NetError> {
        if buf.len() < 2 {
            return Err(NetError::ChunkTruncated);
        }
        let flags = (buf[0] >> 6) & 0x03;
        let size = (((buf[0] & 0x3f) as u16) << 6) | (buf[1] & 0x3f) as u16;
        if flags & NET_CHUNKFLAG_VITAL == 0 {
            return Ok((Self::new(flags, size, 0), 2));
        }
        if buf.len() < 3 {
            return Err(NetError::ChunkTruncated);
        }
        let sequence = (((buf[1] & 0xc0) as u16) << 2) | buf[2] as u16;
        Ok((Self::new(flags, size, sequence), 3))
    }
}

/// A chunk borrowed from a received packet
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk<'a> {
    pub header: ChunkHeader,
    pub data: &'a [u8],
}

/// Walks the chunks of a packet payload
pub struct ChunkUnpacker<'a> {
    data: &'a [u8],
    chunks_left: usize,
    failed: bool,
}

impl<'a> ChunkUnpacker<'a> {
    pub fn new(data: &'a [u8], num_chunks: u8) -> Self {
        Self {
            data,
            chunks_left: num_chunks as usize,
            failed: false,
        }
    }
}

impl<'a> Iterator for ChunkUnpacker<'a> {
    type Item = Result<Chunk<'a>, NetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.chunks_left == 0 || self.data.is_empty() {
            return None;
        }
        self.chunks_left -= 1;

        let (header, consumed) = match ChunkHeader::unpack(self.data) {
            Ok(v) => v,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        let end = consumed + header.size as usize;
        if end > self.data.len() {
            self.failed = true;
            return Some(Err(NetError::ChunkTruncated));
        }

        let chunk = Chunk {
            header,
            data: &self.data[consumed..end],
        };
        self.data = &self.data[end..];
        Some(Ok(chunk))
    }
}

/// Whether `seq` is at or behind `ack`, within half the sequence space
pub fn is_seq_in_backroom(seq: u16, ack: u16) -> bool {
    let bottom = ack as i32 - (NET_MAX_SEQUENCE / 2) as i32;
    let seq = seq as i32;
    let ack = ack as i32;
    if bottom < 0 {
        seq <= ack || seq >= bottom + NET_MAX_SEQUENCE as i32
    } else {
        seq <= ack && seq >= bottom
    }
}
