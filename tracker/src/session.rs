//! Serial session engine
//!
//! Owns the link and the shared command/response buffer. Commands are
//! ASCII verbs terminated by a carriage return; every reply ends with a
//! 4-digit CRC and a carriage return. The buffer is reset at the start
//! of each command and each response, so a timed-out reply can never
//! leak into the next cycle.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use ndi::LinkSettings;

use crate::error::{Result, TrackerError};
use crate::serial::SerialLink;

/// Capacity of the command/response buffer. The largest traffic in
/// either direction is a `PVWR` write at 140 bytes and a full `TX 1001`
/// reply, which stays well under 2 KiB even with all handles occupied.
pub const MAX_BUFFER_SIZE: usize = 2048;

/// Read deadline during steady operation.
pub const STEADY_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Read deadline while the device boots after a reset or renegotiates
/// the link.
pub const BRING_UP_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the break is held to reset the device.
const BREAK_DURATION: Duration = Duration::from_millis(500);

/// Extra settle time after the break before the device can answer.
const BREAK_SETTLE: Duration = Duration::from_millis(500);

/// Settle time on both sides of a host baud rate change.
const COMM_SETTLE: Duration = Duration::from_millis(200);

const CRC_SIZE: usize = ndi::crc::CRC_SIZE;

pub struct Session {
    link: Box<dyn SerialLink>,
    buffer: Vec<u8>,
    read_timeout: Duration,
}

impl Session {
    pub fn new(link: Box<dyn SerialLink>) -> Self {
        Self {
            link,
            buffer: Vec::with_capacity(MAX_BUFFER_SIZE),
            read_timeout: STEADY_READ_TIMEOUT,
        }
    }

    pub fn port_name(&self) -> &str {
        self.link.name()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Send one command: the verb and arguments plus the terminating
    /// carriage return. No CRC is appended; the device accepts the
    /// plain form for every verb this driver uses.
    pub fn command(&mut self, command: &str) -> Result<()> {
        trace!("sending {command:?}");
        self.buffer.clear();
        self.buffer.extend_from_slice(command.as_bytes());
        self.buffer.push(b'\r');
        self.link.write_all(&self.buffer)
    }

    /// Read one reply and hand back the payload as text.
    pub fn response(&mut self) -> Result<&str> {
        self.read_reply()?;
        std::str::from_utf8(&self.buffer).map_err(|_| ndi::ParseError::NotAscii.into())
    }

    /// Read one reply as raw bytes (`TX` stray flag blocks are not
    /// ASCII).
    pub fn response_bytes(&mut self) -> Result<&[u8]> {
        self.read_reply()?;
        Ok(&self.buffer)
    }

    /// Accumulate one reply into the buffer until the trailing carriage
    /// return, then verify and strip the CRC, leaving the payload.
    fn read_reply(&mut self) -> Result<()> {
        self.buffer.clear();
        let deadline = Instant::now() + self.read_timeout;
        let mut chunk = [0u8; 256];

        loop {
            let n = self.link.read(&mut chunk)?;
            if n > 0 {
                if self.buffer.len() + n > MAX_BUFFER_SIZE {
                    return Err(TrackerError::ResponseOverflow(MAX_BUFFER_SIZE));
                }
                self.buffer.extend_from_slice(&chunk[..n]);
                if self.buffer.last() == Some(&b'\r') {
                    break;
                }
            } else if Instant::now() >= deadline {
                return Err(TrackerError::Timeout(self.read_timeout));
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        if self.buffer.len() < CRC_SIZE + 1 {
            return Err(TrackerError::Protocol(ndi::ParseError::Truncated {
                needed: CRC_SIZE + 1,
                remaining: self.buffer.len(),
            }));
        }

        let body = self.buffer.len() - (CRC_SIZE + 1);
        let payload = &self.buffer[..body];
        let received = &self.buffer[body..body + CRC_SIZE];
        let computed = ndi::crc::compute(payload);
        if ndi::crc::decode(received) != Some(computed) {
            return Err(TrackerError::BadCrc {
                payload: String::from_utf8_lossy(payload).to_string(),
                received: String::from_utf8_lossy(received).to_string(),
                computed: String::from_utf8_lossy(&ndi::crc::encode(computed)).to_string(),
            });
        }

        self.buffer.truncate(body);
        Ok(())
    }

    /// Read one reply and require a literal payload prefix such as
    /// `OKAY` or `RESET`.
    pub fn expect(&mut self, expected: &str) -> Result<()> {
        let payload = self.response()?;
        if payload.starts_with(expected) {
            debug!("received expected {expected:?}");
            Ok(())
        } else {
            Err(TrackerError::Unexpected {
                expected: expected.to_string(),
                received: payload.to_string(),
            })
        }
    }

    /// Reset the device: drop to the boot link parameters, hold a
    /// break, and wait for the `RESET` acknowledgement.
    pub fn reset(&mut self) -> Result<()> {
        self.link.apply_settings(&LinkSettings::reset_default())?;
        self.link.send_break(BREAK_DURATION)?;
        std::thread::sleep(BREAK_SETTLE);

        let previous = self.read_timeout;
        self.read_timeout = BRING_UP_READ_TIMEOUT;
        let outcome = self.expect("RESET");
        self.read_timeout = previous;
        outcome
    }

    /// Negotiate new link parameters with `COMM`, then move the host
    /// side of the link to match.
    pub fn configure_link(&mut self, settings: &LinkSettings) -> Result<()> {
        self.command(&format!("COMM {}", settings.comm_argument()))?;
        self.expect("OKAY")?;
        std::thread::sleep(COMM_SETTLE);
        self.link.apply_settings(settings)?;
        std::thread::sleep(COMM_SETTLE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock::ScriptedLink;

    fn session_with(link: ScriptedLink) -> Session {
        let mut session = Session::new(Box::new(link));
        session.set_read_timeout(Duration::from_millis(20));
        session
    }

    #[test]
    fn test_command_is_terminated() {
        let link = ScriptedLink::new();
        let log = link.log();
        let mut session = session_with(link);
        session.command("INIT ").unwrap();
        assert_eq!(log.commands(), vec!["INIT ".to_string()]);
    }

    #[test]
    fn test_response_strips_crc() {
        let mut link = ScriptedLink::new();
        link.push_reply("OKAY");
        let mut session = session_with(link);
        assert_eq!(session.response().unwrap(), "OKAY");
    }

    #[test]
    fn test_response_wire_form() {
        // OKAY with its CRC appended is the literal wire frame.
        let mut link = ScriptedLink::new();
        link.push_raw(b"OKAYA896\r");
        let mut session = session_with(link);
        assert_eq!(session.response().unwrap(), "OKAY");
    }

    #[test]
    fn test_response_bad_crc() {
        let mut link = ScriptedLink::new();
        link.push_raw(b"OKAYA897\r");
        let mut session = session_with(link);
        match session.response() {
            Err(TrackerError::BadCrc {
                payload,
                received,
                computed,
            }) => {
                assert_eq!(payload, "OKAY");
                assert_eq!(received, "A897");
                assert_eq!(computed, "A896");
            }
            other => panic!("expected BadCrc, got {other:?}"),
        }
    }

    #[test]
    fn test_response_timeout() {
        let link = ScriptedLink::new();
        let mut session = session_with(link);
        assert!(matches!(session.response(), Err(TrackerError::Timeout(_))));
    }

    #[test]
    fn test_expect_mismatch() {
        let mut link = ScriptedLink::new();
        link.push_reply("ERROR01");
        let mut session = session_with(link);
        match session.expect("OKAY") {
            Err(TrackerError::Unexpected { expected, received }) => {
                assert_eq!(expected, "OKAY");
                assert_eq!(received, "ERROR01");
            }
            other => panic!("expected Unexpected, got {other:?}"),
        }
    }

    #[test]
    fn test_expect_accepts_prefix() {
        let mut link = ScriptedLink::new();
        link.push_reply("RESETV024");
        let mut session = session_with(link);
        session.expect("RESET").unwrap();
    }

    #[test]
    fn test_consecutive_responses_reset_buffer() {
        let mut link = ScriptedLink::new();
        link.push_reply("OKAY");
        link.push_reply("1");
        let mut session = session_with(link);
        assert_eq!(session.response().unwrap(), "OKAY");
        assert_eq!(session.response().unwrap(), "1");
    }

    #[test]
    fn test_reset_asserts_break_and_restores_timeout() {
        let mut link = ScriptedLink::new();
        link.push_reply("RESET");
        let log = link.log();
        let mut session = session_with(link);
        session.reset().unwrap();
        assert_eq!(log.breaks(), 1);
        assert_eq!(session.read_timeout(), Duration::from_millis(20));
        // The link was dropped back to the 9600 bps boot parameters.
        assert_eq!(
            log.settings_changes().first(),
            Some(&LinkSettings::reset_default())
        );
    }

    #[test]
    fn test_configure_link_sends_comm_then_rebauds() {
        let mut link = ScriptedLink::new();
        link.push_reply("OKAY");
        let log = link.log();
        let mut session = session_with(link);
        session.configure_link(&LinkSettings::full_speed()).unwrap();
        assert_eq!(log.commands(), vec!["COMM 50000".to_string()]);
        assert_eq!(
            log.settings_changes(),
            vec![LinkSettings::full_speed()]
        );
    }
}
