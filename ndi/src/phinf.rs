//! `PHINF` reply parsing
//!
//! `PHINF <handle>0021` requests basic tool information (option bit
//! 0x01) plus the part number (option bit 0x20). The reply is a single
//! fixed-width record; this parser extracts the fields the driver needs
//! and skips the rest:
//!
//! | bytes  | field            |
//! |--------|------------------|
//! | 0-1    | main type        |
//! | 8-19   | manufacturer id  |
//! | 20-22  | tool revision    |
//! | 23-30  | serial number    |
//! | 33-52  | part number      |
//! | 45-46  | channel (Aurora) |
//!
//! The channel field overlaps the part number block; Aurora firmware
//! reuses those bytes for multi-channel tools. A channel of `01` marks
//! the second channel of a Dual 5-DoF tool, which shares its serial
//! number with the first channel.

use crate::cursor::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    pub main_type: String,
    pub manufacturer_id: String,
    pub tool_revision: String,
    pub serial_number: String,
    pub part_number: String,
    pub channel: String,
}

impl ToolInfo {
    /// Serial number with the Dual 5-DoF second channel disambiguated by
    /// bumping the last character, so both channels get distinct tools.
    pub fn disambiguated_serial(&self) -> String {
        let mut serial = self.serial_number.clone();
        if self.channel == "01" {
            if let Some(last) = serial.pop() {
                serial.push((last as u8 + 1) as char);
            }
        }
        serial
    }

    /// An all-zero serial number is a transient fault of Aurora USB
    /// interfaces; the handle query has to be re-run.
    pub fn is_placeholder_serial(&self) -> bool {
        self.serial_number == "00000000"
    }
}

pub fn parse(payload: &[u8]) -> Result<ToolInfo, ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::NotAscii)?;
    if text.len() < 31 {
        return Err(ParseError::Truncated {
            needed: 31,
            remaining: text.len(),
        });
    }

    let field = |range: std::ops::Range<usize>| text[range].to_string();
    Ok(ToolInfo {
        main_type: field(0..2),
        manufacturer_id: field(8..20),
        tool_revision: field(20..23),
        serial_number: field(23..31),
        part_number: if text.len() >= 53 {
            text[33..53].trim_end().to_string()
        } else {
            String::new()
        },
        channel: if text.len() >= 47 {
            field(45..47)
        } else {
            "00".to_string()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a reply with the given fields at their wire offsets. `tail`
    /// is the 20-character block holding the part number (Polaris) or
    /// the channel at offset 12 (Aurora).
    fn reply(main_type: &str, serial: &str, tail: &str) -> String {
        format!("{main_type}800490NDI         004{serial}1F{tail:<20}")
    }

    #[test]
    fn test_probe_reply() {
        let text = reply("02", "12345678", "8700340");
        let info = parse(text.as_bytes()).unwrap();
        assert_eq!(info.main_type, "02");
        assert_eq!(info.manufacturer_id, "NDI         ");
        assert_eq!(info.tool_revision, "004");
        assert_eq!(info.serial_number, "12345678");
        assert_eq!(info.part_number, "8700340");
        // Channel bytes are padding on Polaris tools.
        assert_eq!(info.channel, "  ");
        assert_eq!(info.disambiguated_serial(), "12345678");
        assert!(!info.is_placeholder_serial());
    }

    #[test]
    fn test_second_channel_bumps_serial() {
        let text = reply("0A", "3A800251", "            01      ");
        let info = parse(text.as_bytes()).unwrap();
        assert_eq!(info.channel, "01");
        assert_eq!(info.serial_number, "3A800251");
        assert_eq!(info.disambiguated_serial(), "3A800252");
    }

    #[test]
    fn test_placeholder_serial() {
        let text = reply("02", "00000000", "");
        let info = parse(text.as_bytes()).unwrap();
        assert!(info.is_placeholder_serial());
    }

    #[test]
    fn test_short_reply_without_part_number() {
        // Basic information only, 33 bytes, no part number block.
        let text = reply("01", "87654321", "");
        let info = parse(&text.as_bytes()[..33]).unwrap();
        assert_eq!(info.serial_number, "87654321");
        assert_eq!(info.part_number, "");
        assert_eq!(info.channel, "00");
    }

    #[test]
    fn test_truncated_reply() {
        assert!(matches!(
            parse(b"0280"),
            Err(ParseError::Truncated { .. })
        ));
    }
}
