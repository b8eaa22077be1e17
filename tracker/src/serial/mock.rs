//! Scripted serial link for tests
//!
//! Plays the role of the tracker: replies are queued in the order the
//! driver will read them, each framed with the CRC and carriage return
//! the device would append. Written commands, break assertions, and
//! link settings changes are recorded in a log that stays accessible
//! after the link has been handed to a session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ndi::LinkSettings;

use crate::error::Result;
use crate::serial::SerialLink;

#[derive(Default)]
struct ScriptLog {
    commands: Vec<String>,
    breaks: usize,
    settings_changes: Vec<LinkSettings>,
}

/// Handle onto a [`ScriptedLink`]'s recorded traffic.
#[derive(Clone, Default)]
pub struct ScriptLogHandle {
    log: Arc<Mutex<ScriptLog>>,
}

impl ScriptLogHandle {
    /// Commands written so far, without their trailing carriage return.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().commands.clone()
    }

    pub fn breaks(&self) -> usize {
        self.log.lock().unwrap().breaks
    }

    pub fn settings_changes(&self) -> Vec<LinkSettings> {
        self.log.lock().unwrap().settings_changes.clone()
    }
}

pub struct ScriptedLink {
    name: String,
    replies: VecDeque<Vec<u8>>,
    current: VecDeque<u8>,
    partial_write: Vec<u8>,
    log: ScriptLogHandle,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            replies: VecDeque::new(),
            current: VecDeque::new(),
            partial_write: Vec::new(),
            log: ScriptLogHandle::default(),
        }
    }

    pub fn with_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::new()
        }
    }

    /// Clone the traffic log handle; keep it before moving the link
    /// into a session.
    pub fn log(&self) -> ScriptLogHandle {
        self.log.clone()
    }

    /// Queue a payload, framed with its CRC and carriage return.
    pub fn push_reply(&mut self, payload: &str) {
        self.push_reply_bytes(payload.as_bytes());
    }

    /// Queue a binary payload (for replies with raw flag bytes), framed
    /// with its CRC and carriage return.
    pub fn push_reply_bytes(&mut self, payload: &[u8]) {
        let mut frame = payload.to_vec();
        frame.extend_from_slice(&ndi::crc::encode(ndi::crc::compute(payload)));
        frame.push(b'\r');
        self.replies.push_back(frame);
    }

    /// Queue raw bytes exactly as given (for corrupt-frame tests).
    pub fn push_raw(&mut self, frame: &[u8]) {
        self.replies.push_back(frame.to_vec());
    }
}

impl Default for ScriptedLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for ScriptedLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            if byte == b'\r' {
                let command = String::from_utf8_lossy(&self.partial_write).to_string();
                self.log.log.lock().unwrap().commands.push(command);
                self.partial_write.clear();
            } else {
                self.partial_write.push(byte);
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.current.is_empty() {
            match self.replies.pop_front() {
                Some(frame) => self.current = frame.into(),
                None => return Ok(0),
            }
        }
        // Serve from the current frame only, so one response never
        // bleeds into the next read cycle.
        let mut count = 0;
        while count < buf.len() {
            match self.current.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn send_break(&mut self, _duration: Duration) -> Result<()> {
        self.log.log.lock().unwrap().breaks += 1;
        Ok(())
    }

    fn apply_settings(&mut self, settings: &LinkSettings) -> Result<()> {
        self.log.log.lock().unwrap().settings_changes.push(*settings);
        Ok(())
    }
}
