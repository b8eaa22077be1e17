//! `.rom` tool definition files and `PVWR` upload chunking
//!
//! Passive tools carry no electronics; their marker geometry is stored
//! in a `.rom` file that the host uploads to the tracker before the
//! tool can be enabled. The file is a fixed 752-byte little-endian
//! record starting with the ASCII magic `NDI` and a 16-bit checksum of
//! every byte after the checksum field.
//!
//! Uploads go through `PVWR <handle><addr4><hex128>`: the file is split
//! into 64-byte chunks, each hex-encoded to 128 characters and written
//! at ascending 4-digit hex addresses, zero padded to a multiple of 64.

use thiserror::Error;

/// Length of a complete `.rom` record.
pub const ROM_RECORD_LEN: usize = 752;

/// Hard device-side limit on definition uploads.
pub const MAX_DEFINITION_BYTES: usize = 960;

/// Raw bytes carried by one `PVWR` write.
pub const CHUNK_BYTES: usize = 64;

const MAGIC: &[u8; 3] = b"NDI";
const CHECKSUM_OFFSET: usize = 4;
const MAIN_TYPE_OFFSET: usize = 15;
const MARKER_COUNT_OFFSET: usize = 28;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RomError {
    #[error("definition is {size} bytes, exceeds the {MAX_DEFINITION_BYTES} byte limit")]
    TooLarge { size: usize },
    #[error("definition is {size} bytes, shorter than the {ROM_RECORD_LEN} byte record")]
    Truncated { size: usize },
    #[error("missing NDI magic header")]
    BadMagic,
    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },
}

/// Fields of a validated `.rom` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomInfo {
    pub main_type: u8,
    pub marker_count: u8,
}

/// Validate a complete `.rom` record: magic, checksum, and length.
pub fn validate(data: &[u8]) -> Result<RomInfo, RomError> {
    if data.len() < ROM_RECORD_LEN {
        return Err(RomError::Truncated { size: data.len() });
    }
    if data.len() > MAX_DEFINITION_BYTES {
        return Err(RomError::TooLarge { size: data.len() });
    }
    if &data[..MAGIC.len()] != MAGIC {
        return Err(RomError::BadMagic);
    }

    let stored = u16::from_le_bytes([data[CHECKSUM_OFFSET], data[CHECKSUM_OFFSET + 1]]);
    let computed = checksum(&data[CHECKSUM_OFFSET + 2..]);
    if stored != computed {
        return Err(RomError::ChecksumMismatch { stored, computed });
    }

    Ok(RomInfo {
        main_type: data[MAIN_TYPE_OFFSET],
        marker_count: data[MARKER_COUNT_OFFSET],
    })
}

/// Sum of all bytes after the checksum field, truncated to 16 bits.
pub fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &byte| acc.wrapping_add(u16::from(byte)))
}

/// One `PVWR` write: a 4-digit hex address and 128 hex characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvwrChunk {
    pub address: String,
    pub hex: String,
}

/// Split a definition into `PVWR` chunks, padding the tail with zeros.
pub fn pvwr_chunks(data: &[u8]) -> Result<Vec<PvwrChunk>, RomError> {
    if data.len() > MAX_DEFINITION_BYTES {
        return Err(RomError::TooLarge { size: data.len() });
    }

    let num_chunks = data.len().div_ceil(CHUNK_BYTES);
    let mut chunks = Vec::with_capacity(num_chunks);
    for index in 0..num_chunks {
        let start = index * CHUNK_BYTES;
        let end = (start + CHUNK_BYTES).min(data.len());

        let mut hex = String::with_capacity(2 * CHUNK_BYTES);
        for &byte in &data[start..end] {
            hex.push_str(&format!("{byte:02X}"));
        }
        for _ in end..start + CHUNK_BYTES {
            hex.push_str("00");
        }

        chunks.push(PvwrChunk {
            address: format!("{:04X}", start),
            hex,
        });
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal valid record with the checksum filled in.
    fn build_rom(main_type: u8, marker_count: u8) -> Vec<u8> {
        let mut data = vec![0u8; ROM_RECORD_LEN];
        data[..3].copy_from_slice(MAGIC);
        data[MAIN_TYPE_OFFSET] = main_type;
        data[MARKER_COUNT_OFFSET] = marker_count;
        let sum = checksum(&data[CHECKSUM_OFFSET + 2..]);
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_le_bytes());
        data
    }

    #[test]
    fn test_validate_good_record() {
        let info = validate(&build_rom(2, 4)).unwrap();
        assert_eq!(info.main_type, 2);
        assert_eq!(info.marker_count, 4);
    }

    #[test]
    fn test_validate_bad_magic() {
        let mut data = build_rom(2, 4);
        data[0] = b'X';
        assert_eq!(validate(&data), Err(RomError::BadMagic));
    }

    #[test]
    fn test_validate_bad_checksum() {
        let mut data = build_rom(2, 4);
        data[100] ^= 0xFF;
        assert!(matches!(
            validate(&data),
            Err(RomError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_truncated() {
        assert_eq!(
            validate(&vec![0u8; 100]),
            Err(RomError::Truncated { size: 100 })
        );
    }

    #[test]
    fn test_chunks_round_numbers() {
        // A full record is 752 bytes, which needs 12 chunks; the device
        // limit of 960 bytes needs exactly 15.
        assert_eq!(pvwr_chunks(&vec![1u8; ROM_RECORD_LEN]).unwrap().len(), 12);
        assert_eq!(pvwr_chunks(&vec![1u8; 960]).unwrap().len(), 15);
        assert_eq!(
            pvwr_chunks(&vec![1u8; 961]),
            Err(RomError::TooLarge { size: 961 })
        );
    }

    #[test]
    fn test_chunk_addresses_and_padding() {
        let data: Vec<u8> = (0u8..70).collect();
        let chunks = pvwr_chunks(&data).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].address, "0000");
        assert_eq!(chunks[1].address, "0040");
        assert_eq!(chunks[0].hex.len(), 128);
        assert_eq!(chunks[1].hex.len(), 128);
        assert!(chunks[0].hex.starts_with("000102"));
        // 6 data bytes in the second chunk, the rest zero padding.
        assert!(chunks[1].hex.starts_with("404142434445"));
        assert!(chunks[1].hex.ends_with(&"00".repeat(58)));
    }

    #[test]
    fn test_hex_encoding_is_upper_case() {
        let chunks = pvwr_chunks(&[0xAB, 0xCD]).unwrap();
        assert!(chunks[0].hex.starts_with("ABCD"));
    }
}
