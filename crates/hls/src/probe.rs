//! Container structure checks for downloaded fragments.
//!
//! Used when no expected byte length is known: a fragment that stops in the
//! middle of a box (fMP4) or a packet (MPEG-TS) was cut off in transit.

use thiserror::Error;

use crate::reference;

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// MPEG-TS, a whole number of 188-byte packets.
    Ts,
    /// fMP4 init segment (`#EXT-X-MAP`), must carry a `moov` box.
    Fmp4Init,
    /// fMP4 media segment, must carry an `mdat` box.
    Fmp4Media,
    /// Anything else, only checked for being non-empty.
    Other,
}

impl SegmentKind {
    pub fn detect(reference: &str, is_init: bool) -> Self {
        match reference::extension(reference).as_deref() {
            Some("ts") => SegmentKind::Ts,
            Some("m4s" | "mp4" | "m4v" | "m4a" | "cmfv" | "cmfa" | "fmp4") => {
                if is_init {
                    SegmentKind::Fmp4Init
                } else {
                    SegmentKind::Fmp4Media
                }
            }
            _ if is_init => SegmentKind::Fmp4Init,
            _ => SegmentKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    #[error("fragment is empty")]
    Empty,

    #[error("box `{fourcc}` at offset {offset} declares {declared} bytes but only {available} remain")]
    TruncatedBox {
        fourcc: String,
        offset: usize,
        declared: u64,
        available: usize,
    },

    #[error("{remaining} trailing bytes at offset {offset} do not form a box header")]
    TrailingBytes { offset: usize, remaining: usize },

    #[error("box `{fourcc}` at offset {offset} has invalid size {declared}")]
    InvalidBoxSize {
        fourcc: String,
        offset: usize,
        declared: u64,
    },

    #[error("required box `{0}` not found")]
    MissingBox(&'static str),

    #[error("length {len} is not a multiple of the {TS_PACKET_SIZE}-byte packet size")]
    PartialPacket { len: usize },

    #[error("packet {packet} lost sync (next sync byte at {resync:?})")]
    SyncLost { packet: usize, resync: Option<usize> },
}

/// Checks that `data` is a structurally whole fragment of the given kind.
pub fn check_structure(kind: SegmentKind, data: &[u8]) -> Result<(), StructureError> {
    if data.is_empty() {
        return Err(StructureError::Empty);
    }
    match kind {
        SegmentKind::Ts => check_ts(data),
        SegmentKind::Fmp4Init => check_boxes(data, b"moov"),
        SegmentKind::Fmp4Media => check_boxes(data, b"mdat"),
        SegmentKind::Other => Ok(()),
    }
}

fn check_ts(data: &[u8]) -> Result<(), StructureError> {
    if data.len() % TS_PACKET_SIZE != 0 {
        return Err(StructureError::PartialPacket { len: data.len() });
    }
    for (packet, chunk) in data.chunks_exact(TS_PACKET_SIZE).enumerate() {
        if chunk[0] != TS_SYNC_BYTE {
            let start = packet * TS_PACKET_SIZE;
            let resync = memchr::memchr(TS_SYNC_BYTE, &data[start..]).map(|i| start + i);
            return Err(StructureError::SyncLost { packet, resync });
        }
    }
    Ok(())
}

/// Box header: `(total size, fourcc, header size)`.
///
/// Handles the 64-bit extended size (`size == 1`) and the to-end-of-data size
/// (`size == 0`). `None` when fewer bytes than a header remain.
fn read_box_header(data: &[u8]) -> Option<(u64, [u8; 4], usize)> {
    if data.len() < 8 {
        return None;
    }

    let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
    let fourcc = [data[4], data[5], data[6], data[7]];

    match size {
        1 => {
            let ext: [u8; 8] = data.get(8..16)?.try_into().ok()?;
            Some((u64::from_be_bytes(ext), fourcc, 16))
        }
        0 => Some((data.len() as u64, fourcc, 8)),
        _ => Some((size, fourcc, 8)),
    }
}

/// Walks the top-level boxes, which must tile the data exactly, and requires
/// `needed` to be one of them.
fn check_boxes(data: &[u8], needed: &'static [u8; 4]) -> Result<(), StructureError> {
    let mut offset = 0usize;
    let mut found = false;

    while offset < data.len() {
        let remaining = &data[offset..];
        let Some((declared, fourcc, header_size)) = read_box_header(remaining) else {
            return Err(StructureError::TrailingBytes {
                offset,
                remaining: remaining.len(),
            });
        };

        if declared < header_size as u64 {
            return Err(StructureError::InvalidBoxSize {
                fourcc: fourcc_to_string(&fourcc),
                offset,
                declared,
            });
        }
        if declared > remaining.len() as u64 {
            return Err(StructureError::TruncatedBox {
                fourcc: fourcc_to_string(&fourcc),
                offset,
                declared,
                available: remaining.len(),
            });
        }

        found |= &fourcc == needed;
        // fits in usize: bounded by remaining.len()
        offset += declared as usize;
    }

    if found {
        Ok(())
    } else {
        Err(StructureError::MissingBox(fourcc_name(needed)))
    }
}

fn fourcc_name(fourcc: &'static [u8; 4]) -> &'static str {
    match fourcc {
        b"moov" => "moov",
        b"mdat" => "mdat",
        _ => "????",
    }
}

fn fourcc_to_string(fourcc: &[u8; 4]) -> String {
    fourcc
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}
