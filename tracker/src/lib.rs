//! Driver for NDI Polaris/Aurora pose trackers
//!
//! Talks the vendor's ASCII command protocol over RS-232: finds the
//! tracker on a serial port, negotiates link parameters, uploads
//! passive tool definitions, walks the port handle lifecycle, and polls
//! 6-DoF poses for every enabled tool at a fixed rate.
//!
//! The driver runs as a single periodic task that exclusively owns the
//! serial port. Consumers talk to it through a command mailbox and
//! receive [`TrackerEvent`]s plus a per-tick state snapshot:
//!
//! ```no_run
//! use tracker::{spawn, TrackerCommand, TrackerConfig};
//!
//! let handle = spawn(TrackerConfig::default());
//! handle.send(TrackerCommand::Connect { port: None }).unwrap();
//! handle.send(TrackerCommand::ToggleTracking(true)).unwrap();
//! for tool in &handle.state().tools {
//!     if tool.tooltip_frame.valid {
//!         println!("{}: {}", tool.name, tool.tooltip_frame.translation);
//!     }
//! }
//! ```

pub mod config;
pub mod discover;
pub mod driver;
pub mod error;
mod handles;
pub mod serial;
pub mod session;
pub mod tools;

pub use config::{ToolConfig, TooltipConfig, TrackerConfig};
pub use driver::{
    spawn, PublishedTool, SessionState, TrackerCommand, TrackerEvent, TrackerHandle, TrackerState,
    TrackerTask,
};
pub use error::{Result, TrackerError};
pub use tools::{Tool, ToolFrame, ToolId, ToolRegistry};
