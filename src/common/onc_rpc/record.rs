//! TCP record marking, see [RFC5531 §11](https://datatracker.ietf.org/doc/html/rfc5531#section-11).
//!
//! Each record is a sequence of fragments; a fragment header is a 32-bit
//! big-endian word whose top bit marks the last fragment and whose low 31
//! bits carry the fragment length.

use std::io::{ErrorKind, Result};

use byteorder::{ByteOrder, NetworkEndian};
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Reassemble one record, refusing to buffer more than `maxlen` bytes.
pub async fn read_record<RD>(reader: &mut RD, maxlen: usize) -> Result<Vec<u8>>
where
    RD: AsyncRead + Unpin,
{
    let mut record = Vec::new();
    loop {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;
        let word = NetworkEndian::read_u32(&header);

        let len = (word & !LAST_FRAGMENT) as usize;
        if record.len() + len > maxlen || record.try_reserve(len).is_err() {
            return Err(ErrorKind::OutOfMemory.into());
        }
        let start = record.len();
        record.resize(start + len, 0);
        reader.read_exact(&mut record[start..]).await?;

        if word & LAST_FRAGMENT != 0 {
            return Ok(record);
        }
    }
}

/// Send `record` as a single terminal fragment.
pub async fn write_record<WR>(writer: &mut WR, record: Vec<u8>) -> Result<()>
where
    WR: AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    NetworkEndian::write_u32(&mut header, LAST_FRAGMENT | (record.len() as u32 & !LAST_FRAGMENT));
    writer.write_all(&header).await?;
    writer.write_all(&record).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use futures::io::Cursor;

    #[async_std::test]
    async fn single_fragment() {
        let mut cursor = Cursor::new(b"\x80\x00\x00\x04\x01\x02\x03\x04".to_vec());
        let rec = super::read_record(&mut cursor, 16).await.unwrap();
        assert_eq!(rec, [1, 2, 3, 4]);
    }

    #[async_std::test]
    async fn multiple_fragments() {
        let mut cursor = Cursor::new(b"\x00\x00\x00\x02\x01\x02\x80\x00\x00\x02\x03\x04".to_vec());
        let rec = super::read_record(&mut cursor, 16).await.unwrap();
        assert_eq!(rec, [1, 2, 3, 4]);
    }

    #[async_std::test]
    async fn oversized_record_is_rejected() {
        let mut cursor = Cursor::new(b"\x80\x00\x00\x04\x01\x02\x03\x04".to_vec());
        assert!(super::read_record(&mut cursor, 3).await.is_err());
    }

    #[async_std::test]
    async fn write_then_read_back() {
        let mut buf = Cursor::new(Vec::new());
        super::write_record(&mut buf, vec![9, 8, 7]).await.unwrap();
        let mut cursor = Cursor::new(buf.into_inner());
        let rec = super::read_record(&mut cursor, 16).await.unwrap();
        assert_eq!(rec, [9, 8, 7]);
    }
}
