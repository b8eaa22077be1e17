//! NDI Polaris/Aurora serial protocol parsing
//!
//! This crate provides the wire-level pieces of the NDI "Combined API":
//! the proprietary CRC-16, the fixed-width ASCII reply formats (`PHSR`,
//! `PHINF`, `TX`), serial link parameter encoding for the `COMM` command,
//! and `.rom` tool definition file handling for `PVWR` uploads.
//!
//! Everything here is pure: no I/O, no device state. The driver layer in
//! the `tracker` crate owns the serial session and feeds reply payloads
//! (already stripped of CRC and carriage return) into these parsers.

pub mod crc;
mod cursor;
pub mod phinf;
pub mod phsr;
pub mod rom;
mod settings;
pub mod tx;

pub use cursor::{ParseError, Reply};
pub use phinf::ToolInfo;
pub use phsr::HandleRecord;
pub use rom::{PvwrChunk, RomError, RomInfo};
pub use settings::{BaudRate, CharacterSize, FlowControl, LinkSettings, Parity, StopBits};
pub use tx::{PoseSample, StrayMarker, ToolRow, ToolSample, TxOptions, TxReply};
