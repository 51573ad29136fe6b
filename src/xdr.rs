//! Big-endian XDR primitives used by the upcall/downcall and on-the-wire
//! credential header formats.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::GssAuthError;

pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.write_u32::<BigEndian>(v).expect("Vec<u8> write cannot fail");
}

pub fn write_i32(out: &mut Vec<u8>, v: i32) {
    out.write_i32::<BigEndian>(v).expect("Vec<u8> write cannot fail");
}

pub fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, GssAuthError> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|_| GssAuthError::Protocol("truncated while reading u32".to_string()))
}

pub fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32, GssAuthError> {
    cursor
        .read_i32::<BigEndian>()
        .map_err(|_| GssAuthError::Protocol("truncated while reading i32".to_string()))
}

/// Write an XDR opaque: a 4-byte big-endian length prefix followed by the
/// bytes themselves, padded with zeros to a 4-byte boundary.
pub fn write_opaque(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
    pad4(out, bytes.len());
}

pub fn pad4(out: &mut Vec<u8>, written_len: usize) {
    let rem = written_len % 4;
    if rem != 0 {
        out.extend(std::iter::repeat(0u8).take(4 - rem));
    }
}

pub fn read_opaque(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, GssAuthError> {
    let len = read_u32(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| GssAuthError::Protocol("truncated opaque body".to_string()))?;
    let rem = len % 4;
    if rem != 0 {
        let mut pad = vec![0u8; 4 - rem];
        cursor
            .read_exact(&mut pad)
            .map_err(|_| GssAuthError::Protocol("truncated opaque padding".to_string()))?;
    }
    Ok(buf)
}

/// A `netobj`: a 4-byte length prefix followed by that many bytes, with no
/// padding. Used inside downcall messages.
pub fn write_netobj(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

pub fn read_netobj(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, GssAuthError> {
    let len = read_u32(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| GssAuthError::Protocol("truncated netobj body".to_string()))?;
    Ok(buf)
}

pub fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), GssAuthError> {
    out.write_all(bytes)
        .map_err(|e| GssAuthError::Protocol(e.to_string()))
}
