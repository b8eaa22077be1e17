//! `TX` reply parsing
//!
//! `TX <options>` returns the latest sample for every enabled port
//! handle. Option bit 0x0001 selects transformation data (one row per
//! handle), bit 0x1000 appends the stray marker block. The shape of the
//! reply depends on the options sent, so the parser has to be told what
//! was requested.
//!
//! Transformation rows carry a scalar-first quaternion as four 6
//! character fields scaled by 1/10000, a translation as three 7
//! character fields scaled to millimetres by 1/100, the RMS error, the
//! port status, and an 8-digit hex frame number, each row terminated by
//! a line feed. Handles without data report `MISSING`, `DISABLED` or
//! `UNOCCUPIED` instead of the numeric fields.

use crate::cursor::{ParseError, Reply};

/// Which option bits were set in the `TX` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    /// 0x0001, transformation data rows.
    pub transforms: bool,
    /// 0x1000, stray marker block.
    pub stray: bool,
}

impl TxOptions {
    /// The command text for this option set.
    pub fn command(&self) -> &'static str {
        match (self.transforms, self.stray) {
            (true, false) => "TX 0001",
            (true, true) => "TX 1001",
            (false, true) => "TX 1000",
            (false, false) => "TX 0000",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoseSample {
    /// Unit quaternion components, scalar first (w, x, y, z).
    pub quaternion: [f64; 4],
    /// Translation in millimetres.
    pub translation: [f64; 3],
    /// RMS residual reported by the measurement system.
    pub error_rms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolSample {
    Missing,
    Disabled,
    Unoccupied,
    Pose(PoseSample),
}

impl ToolSample {
    pub fn pose(&self) -> Option<&PoseSample> {
        match self {
            ToolSample::Pose(pose) => Some(pose),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolRow {
    pub handle: String,
    pub sample: ToolSample,
    pub port_status: u32,
    pub frame_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrayMarker {
    /// False when the marker was seen outside the calibrated volume.
    pub in_volume: bool,
    /// Position in millimetres.
    pub position: [f64; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxReply {
    /// One row per enabled handle; empty when transformation data was
    /// not requested.
    pub tools: Vec<ToolRow>,
    pub stray_markers: Option<Vec<StrayMarker>>,
    pub system_status: u16,
}

pub fn parse(payload: &[u8], options: TxOptions) -> Result<TxReply, ParseError> {
    let mut reply = Reply::new(payload);
    let handle_count = reply.hex(2)? as usize;

    let mut tools = Vec::new();
    for _ in 0..handle_count {
        if options.transforms {
            tools.push(parse_tool_row(&mut reply)?);
        } else {
            // Without transformation data each row is just the handle.
            reply.skip(2)?;
            reply.line_feed()?;
        }
    }

    let stray_markers = if options.stray {
        Some(parse_stray_block(&mut reply)?)
    } else {
        None
    };

    let system_status = reply.hex(4)? as u16;
    Ok(TxReply {
        tools,
        stray_markers,
        system_status,
    })
}

fn parse_tool_row(reply: &mut Reply<'_>) -> Result<ToolRow, ParseError> {
    let handle = reply.take_str(2)?.to_string();

    let sample = if reply.eat("MISSING") {
        ToolSample::Missing
    } else if reply.eat("DISABLED") {
        ToolSample::Disabled
    } else if reply.eat("UNOCCUPIED") {
        ToolSample::Unoccupied
    } else {
        let quaternion = [
            reply.fixed(6, 10_000.0)?,
            reply.fixed(6, 10_000.0)?,
            reply.fixed(6, 10_000.0)?,
            reply.fixed(6, 10_000.0)?,
        ];
        let translation = [
            reply.fixed(7, 100.0)?,
            reply.fixed(7, 100.0)?,
            reply.fixed(7, 100.0)?,
        ];
        let error_rms = reply.fixed(6, 10_000.0)?;
        ToolSample::Pose(PoseSample {
            quaternion,
            translation,
            error_rms,
        })
    };

    let port_status = reply.hex(8)?;
    let frame_number = reply.hex(8)?;
    reply.line_feed()?;

    Ok(ToolRow {
        handle,
        sample,
        port_status,
        frame_number,
    })
}

/// Parse the stray marker block: a 2-digit hex count, the packed
/// out-of-volume flags, then three 7-character coordinates per marker.
///
/// The flag bytes pack four markers each. The device sends the
/// complement, so each byte is inverted first; its bits 3..0 then hold
/// "inside volume" flags, with the first `4*ceil(n/4) - n` bits being
/// padding to discard.
fn parse_stray_block(reply: &mut Reply<'_>) -> Result<Vec<StrayMarker>, ParseError> {
    let count = reply.hex(2)? as usize;
    let flag_bytes = count.div_ceil(4);
    let garbage_bits = 4 * flag_bytes - count;

    let mut in_volume = Vec::with_capacity(4 * flag_bytes);
    for &byte in reply.take(flag_bytes)? {
        let flipped = !byte;
        for bit in (0..4).rev() {
            in_volume.push(flipped >> bit & 1 == 1);
        }
    }

    let mut markers = Vec::with_capacity(count);
    for index in 0..count {
        let position = [
            reply.fixed(7, 100.0)?,
            reply.fixed(7, 100.0)?,
            reply.fixed(7, 100.0)?,
        ];
        markers.push(StrayMarker {
            in_volume: in_volume[index + garbage_bits],
            position,
        });
    }
    Ok(markers)
}
