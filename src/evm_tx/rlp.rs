//! RLP encoding and decoding for EVM transactions.

use anyhow::Result;

use crate::error::DeployerError;

/// A decoded or to-be-encoded RLP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

/// Big-endian bytes with no leading zeros (RLP integer format).
pub fn trim_be(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

impl RlpItem {
    pub fn uint(value: u128) -> Self {
        RlpItem::Bytes(trim_be(&value.to_be_bytes()))
    }

    pub fn bytes(data: &[u8]) -> Self {
        RlpItem::Bytes(data.to_vec())
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            RlpItem::Bytes(data) if data.len() == 1 && data[0] < 0x80 => vec![data[0]],
            RlpItem::Bytes(data) => {
                let mut out = encode_length(data.len(), 0x80);
                out.extend_from_slice(data);
                out
            }
            RlpItem::List(items) => {
                let payload: Vec<u8> = items.iter().flat_map(|item| item.encode()).collect();
                let mut out = encode_length(payload.len(), 0xc0);
                out.extend(payload);
                out
            }
        }
    }

    /// Decodes exactly one item spanning all of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (item, consumed) = decode_item(data)?;
        if consumed != data.len() {
            return Err(malformed(format!(
                "{} trailing byte(s) after item",
                data.len() - consumed
            )));
        }
        Ok(item)
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            RlpItem::Bytes(data) => Ok(data),
            RlpItem::List(_) => Err(malformed("expected bytes, found list")),
        }
    }

    pub fn as_list(&self) -> Result<&[RlpItem]> {
        match self {
            RlpItem::List(items) => Ok(items),
            RlpItem::Bytes(_) => Err(malformed("expected list, found bytes")),
        }
    }

    pub fn as_u128(&self) -> Result<u128> {
        let data = self.as_bytes()?;
        if data.len() > 16 {
            return Err(malformed(format!("integer of {} bytes exceeds u128", data.len())));
        }
        if data.first() == Some(&0) {
            return Err(malformed("integer with leading zero"));
        }
        let mut buf = [0u8; 16];
        buf[16 - data.len()..].copy_from_slice(data);
        Ok(u128::from_be_bytes(buf))
    }

    pub fn as_u64(&self) -> Result<u64> {
        let value = self.as_u128()?;
        u64::try_from(value).map_err(|_| malformed(format!("integer {} exceeds u64", value)))
    }
}

fn malformed(reason: impl Into<String>) -> anyhow::Error {
    DeployerError::malformed("RLP data", reason).into()
}

fn encode_length(len: usize, offset: u8) -> Vec<u8> {
    if len <= 55 {
        vec![offset + len as u8]
    } else {
        let len_bytes = trim_be(&(len as u64).to_be_bytes());
        let mut out = vec![offset + 55 + len_bytes.len() as u8];
        out.extend(len_bytes);
        out
    }
}

fn read_length(data: &[u8], len_of_len: usize) -> Result<usize> {
    if data.len() < len_of_len {
        return Err(malformed("truncated length prefix"));
    }
    if len_of_len > 8 || data.first() == Some(&0) {
        return Err(malformed("non-canonical length prefix"));
    }
    let mut buf = [0u8; 8];
    buf[8 - len_of_len..].copy_from_slice(&data[..len_of_len]);
    let len = usize::try_from(u64::from_be_bytes(buf)).map_err(|_| malformed("length overflows usize"))?;
    // Payloads up to 55 bytes must use the short form
    if len <= 55 {
        return Err(malformed(format!("long-form prefix for {} byte payload", len)));
    }
    Ok(len)
}

fn take(data: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    let end = start
        .checked_add(len)
        .ok_or_else(|| malformed("length overflow"))?;
    data.get(start..end)
        .ok_or_else(|| malformed("item exceeds input"))
}

fn decode_item(data: &[u8]) -> Result<(RlpItem, usize)> {
    let prefix = *data.first().ok_or_else(|| malformed("empty input"))?;
    match prefix {
        0x00..=0x7f => Ok((RlpItem::Bytes(vec![prefix]), 1)),
        0x80..=0xb7 => {
            let len = (prefix - 0x80) as usize;
            let body = take(data, 1, len)?;
            if let [byte] = body {
                if *byte < 0x80 {
                    return Err(malformed(format!("single byte {:#04x} must encode as itself", byte)));
                }
            }
            Ok((RlpItem::Bytes(body.to_vec()), 1 + len))
        }
        0xb8..=0xbf => {
            let len_of_len = (prefix - 0xb7) as usize;
            let len = read_length(&data[1..], len_of_len)?;
            let body = take(data, 1 + len_of_len, len)?;
            Ok((RlpItem::Bytes(body.to_vec()), 1 + len_of_len + len))
        }
        0xc0..=0xf7 => {
            let len = (prefix - 0xc0) as usize;
            let body = take(data, 1, len)?;
            Ok((RlpItem::List(decode_list(body)?), 1 + len))
        }
        0xf8..=0xff => {
            let len_of_len = (prefix - 0xf7) as usize;
            let len = read_length(&data[1..], len_of_len)?;
            let body = take(data, 1 + len_of_len, len)?;
            Ok((RlpItem::List(decode_list(body)?), 1 + len_of_len + len))
        }
    }
}

fn decode_list(mut body: &[u8]) -> Result<Vec<RlpItem>> {
    let mut items = Vec::new();
    while !body.is_empty() {
        let (item, consumed) = decode_item(body)?;
        items.push(item);
        body = &body[consumed..];
    }
    Ok(items)
}
