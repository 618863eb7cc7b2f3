//! Binary batch descriptor exchanged directly over the peer channel.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! i32 unit count
//! per unit:
//!   i32 name length, including the trailing zero byte
//!   name bytes (UTF-8), 0x00
//!   i32 url length, including the trailing zero byte
//!   url bytes (UTF-8), 0x00
//!   i64 size in bytes
//! ```
//!
//! Strings are both length-prefixed and zero-terminated, so peers written
//! against C-style or Pascal-style readers decode the same buffer.

use crate::{DropError, Result};

const COUNT_LEN: usize = std::mem::size_of::<i32>();
const SIZE_LEN: usize = std::mem::size_of::<i64>();
/// Two empty strings (prefix + terminator each) and the size field.
const MIN_RECORD_LEN: usize = 2 * (COUNT_LEN + 1) + SIZE_LEN;

/// One unit as carried by the wire format.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WireRecord {
    pub name: String,
    pub url: String,
    pub size: u64,
}

impl WireRecord {
    pub fn new(name: impl Into<String>, url: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            size,
        }
    }
}

pub fn encode(records: &[WireRecord]) -> Result<Vec<u8>> {
    let count = i32::try_from(records.len()).map_err(|_| {
        DropError::Encode(format!("too many units: {}", records.len()))
    })?;

    let capacity = records.iter().fold(COUNT_LEN, |acc, r| {
        acc + MIN_RECORD_LEN + r.name.len() + r.url.len()
    });
    let mut buffer = Vec::with_capacity(capacity);
    buffer.extend_from_slice(&count.to_le_bytes());

    for record in records {
        write_string(&mut buffer, &record.name)?;
        write_string(&mut buffer, &record.url)?;
        let size = i64::try_from(record.size).map_err(|_| {
            DropError::Encode(format!("size out of range: {}", record.size))
        })?;
        buffer.extend_from_slice(&size.to_le_bytes());
    }

    log::trace!("encoded {} units into {} bytes", count, buffer.len());
    Ok(buffer)
}

/// Decodes a whole buffer. Any inconsistency fails the decode; a partial
/// list is never returned.
pub fn decode(buffer: &[u8]) -> Result<Vec<WireRecord>> {
    let mut reader = Reader { buffer, offset: 0 };

    let count = reader.read_i32()?;
    if count < 0 {
        return Err(DropError::Decode(format!("negative unit count {count}")));
    }
    let count = count as usize;
    if count > reader.remaining() / MIN_RECORD_LEN {
        return Err(DropError::Decode(format!(
            "unit count {count} does not fit into {} bytes",
            reader.remaining()
        )));
    }

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let name = reader.read_string()?;
        let url = reader.read_string()?;
        let size = reader.read_i64()?;
        if size < 0 {
            return Err(DropError::Decode(format!("negative size {size}")));
        }
        records.push(WireRecord {
            name,
            url,
            size: size as u64,
        });
    }

    if reader.remaining() != 0 {
        return Err(DropError::Decode(format!(
            "{} trailing bytes after the last unit",
            reader.remaining()
        )));
    }

    Ok(records)
}

fn write_string(buffer: &mut Vec<u8>, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.contains(&0) {
        return Err(DropError::Encode(format!(
            "string contains a zero byte: {value:?}"
        )));
    }
    let len = i32::try_from(bytes.len() + 1).map_err(|_| {
        DropError::Encode(format!("string too long: {} bytes", bytes.len()))
    })?;
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(bytes);
    buffer.push(0);
    Ok(())
}

struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(DropError::Decode(format!(
                "need {len} bytes at offset {}, only {} left",
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut raw = [0u8; COUNT_LEN];
        raw.copy_from_slice(self.take(COUNT_LEN)?);
        Ok(i32::from_le_bytes(raw))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let mut raw = [0u8; SIZE_LEN];
        raw.copy_from_slice(self.take(SIZE_LEN)?);
        Ok(i64::from_le_bytes(raw))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len <= 0 {
            return Err(DropError::Decode(format!(
                "invalid string length {len} at offset {}",
                self.offset
            )));
        }
        let bytes = self.take(len as usize)?;
        let (terminator, content) = bytes
            .split_last()
            .ok_or_else(|| DropError::Decode("empty string field".to_owned()))?;
        if *terminator != 0 {
            return Err(DropError::Decode(format!(
                "string at offset {} is not zero-terminated",
                self.offset - bytes.len()
            )));
        }
        Ok(std::str::from_utf8(content)?.to_owned())
    }
}
