//! Serial link abstraction
//!
//! The session engine talks to the tracker through [`SerialLink`] so
//! tests can script a device ([`mock::ScriptedLink`]) while production
//! code uses a real port through the `serialport` crate.

pub mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use ndi::{CharacterSize, FlowControl, LinkSettings, Parity, StopBits};
use tracing::debug;

use crate::error::Result;

/// How long one blocking read on the real port waits before giving the
/// session loop a chance to check its own deadline.
const READ_POLL: Duration = Duration::from_millis(100);

/// Byte transport to the tracker.
///
/// `read` returns `Ok(0)` when no data arrived within the link's poll
/// interval; the caller owns the overall response deadline.
pub trait SerialLink: Send {
    fn name(&self) -> &str;
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Hold a serial break for `duration` (triggers a device reset).
    fn send_break(&mut self, duration: Duration) -> Result<()>;
    fn apply_settings(&mut self, settings: &LinkSettings) -> Result<()>;
}

/// [`SerialLink`] over a real serial port.
pub struct PortLink {
    name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl PortLink {
    pub fn open(path: &str, settings: &LinkSettings) -> Result<Self> {
        debug!("opening {path} at {} bps", settings.baud.bits_per_second());
        let port = serialport::new(path, settings.baud.bits_per_second())
            .data_bits(data_bits(settings.character_size))
            .parity(parity(settings.parity))
            .stop_bits(stop_bits(settings.stop_bits))
            .flow_control(flow_control(settings.flow_control))
            .timeout(READ_POLL)
            .open()?;
        Ok(Self {
            name: path.to_string(),
            port,
        })
    }
}

impl SerialLink for PortLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn send_break(&mut self, duration: Duration) -> Result<()> {
        self.port.set_break()?;
        std::thread::sleep(duration);
        self.port.clear_break()?;
        Ok(())
    }

    fn apply_settings(&mut self, settings: &LinkSettings) -> Result<()> {
        self.port.set_baud_rate(settings.baud.bits_per_second())?;
        self.port.set_data_bits(data_bits(settings.character_size))?;
        self.port.set_parity(parity(settings.parity))?;
        self.port.set_stop_bits(stop_bits(settings.stop_bits))?;
        self.port.set_flow_control(flow_control(settings.flow_control))?;
        Ok(())
    }
}

fn data_bits(size: CharacterSize) -> serialport::DataBits {
    match size {
        CharacterSize::Eight => serialport::DataBits::Eight,
        CharacterSize::Seven => serialport::DataBits::Seven,
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}
