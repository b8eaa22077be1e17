//! Tracker discovery
//!
//! With no port configured, every serial port the platform reports is
//! tried in turn: open at the 9600 bps boot parameters, hold a break,
//! and wait for the `RESET` acknowledgement. The first port that
//! answers is the tracker.

use ndi::LinkSettings;
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::serial::PortLink;
use crate::session::Session;

/// Ports to probe: just the configured one if set, otherwise whatever
/// the platform enumerates.
pub fn candidate_ports(configured: Option<&str>) -> Vec<String> {
    if let Some(port) = configured {
        if !port.is_empty() {
            return vec![port.to_string()];
        }
    }
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|info| info.port_name).collect(),
        Err(e) => {
            warn!("serial port enumeration failed: {e}");
            Vec::new()
        }
    }
}

/// Find and reset the tracker, returning a session on the latched port.
pub fn find_tracker(configured: Option<&str>) -> Result<Session> {
    for port in candidate_ports(configured) {
        debug!("probing {port}");
        let link = match PortLink::open(&port, &LinkSettings::reset_default()) {
            Ok(link) => link,
            Err(e) => {
                debug!("cannot open {port}: {e}");
                continue;
            }
        };

        let mut session = Session::new(Box::new(link));
        match session.reset() {
            Ok(()) => {
                info!("tracker found on {port}");
                return Ok(session);
            }
            Err(e) => debug!("{port} did not answer the reset: {e}"),
        }
    }
    Err(TrackerError::NoDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_port_short_circuits() {
        assert_eq!(
            candidate_ports(Some("/dev/ttyUSB3")),
            vec!["/dev/ttyUSB3".to_string()]
        );
    }

    #[test]
    fn test_empty_configured_port_falls_through() {
        // An empty string means "discover", so the result must not
        // contain an empty port name.
        assert!(!candidate_ports(Some("")).contains(&String::new()));
    }
}
