//! Versioned binary persistence format for the HNSW index (§6).
//!
//! ```text
//! magic[8]        "CXHNSW01"
//! version[4]      u32 = 1
//! dims[4]         u32
//! node_count[4]   u32
//! entry_point[4]  i32 (-1 if empty)
//! max_level[4]    u32
//! M[4] Mmax0[4] ef_construction[4] ef_search[4]
//! for each node:
//!   id[8]       i64
//!   level[4]    u32
//!   vector[dims * 4] f32
//!   for layer in 0..=level:
//!     friend_count[4] u32
//!     friends[friend_count * 4] u32 (indices into node list)
//! ```

use std::io::{self, Read, Write};

pub const FORMAT_MAGIC: &[u8; 8] = b"CXHNSW01";
pub const FORMAT_VERSION: u32 = 1;

pub fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_i32(w: &mut impl Write, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_i64(w: &mut impl Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32(w: &mut impl Write, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_i32(r: &mut impl Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn read_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn read_f32(r: &mut impl Read) -> io::Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}
