//! The tracker task
//!
//! A single periodic task owns the serial session, the tool registry,
//! and the published state. Consumers enqueue [`TrackerCommand`]s on a
//! mailbox that is drained at the top of every tick; while tracking is
//! on, each tick runs one `TX` round trip and republishes the state.
//! No command ever interleaves with a pending reply, and consumers only
//! observe snapshots taken between ticks.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use ndarray::Array2;
use tracing::{debug, error, info, trace, warn};

use ndi::tx::{self, StrayMarker, ToolSample, TxOptions};
use ndi::LinkSettings;

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::serial::SerialLink;
use crate::session::{Session, BRING_UP_READ_TIMEOUT, STEADY_READ_TIMEOUT};
use crate::tools::{ToolFrame, ToolRegistry};
use crate::{discover, handles};

/// Rows in the stray marker table; the device reports at most 50.
pub const STRAY_MARKER_ROWS: usize = 50;

/// Columns: occupied flag, in-volume flag, x, y, z.
pub const STRAY_MARKER_COLS: usize = 5;

/// The only firmware revision this driver has been validated against.
const SUPPORTED_FIRMWARE: &str = "024";

/// Pause after `VER` queries before the reply is complete.
const VER_SETTLE: Duration = Duration::from_millis(100);

/// Pause after `TSTART`/`TSTOP` acknowledgements.
const TRACKING_SETTLE: Duration = Duration::from_millis(500);

/// Pause between `BEEP` retries while the device reports busy.
const BEEP_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Opening,
    Resetting,
    Initializing,
    /// Connected and idle, tools enumerated.
    Ready,
    Tracking,
}

#[derive(Debug, Clone)]
pub enum TrackerCommand {
    /// Connect, optionally overriding the configured port.
    Connect { port: Option<String> },
    Disconnect,
    /// Sound the buzzer 1 to 9 times.
    Beep(u8),
    ToggleTracking(bool),
    ToggleStrayMarkers(bool),
    /// One `TX 1000` round to refresh the stray marker table.
    ReportStrayMarkers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Connected to the named port, or `""` after a disconnect.
    Connected(String),
    Tracking(bool),
    ToolsUpdated,
}

/// Per-tool view published after each tick.
#[derive(Debug, Clone)]
pub struct PublishedTool {
    pub name: String,
    pub serial_number: String,
    pub tooltip_frame: ToolFrame,
    pub marker_frame: ToolFrame,
    pub error_rms: f64,
    pub frame_number: u32,
}

/// Snapshot of the driver state, written once per tick.
#[derive(Debug, Clone)]
pub struct TrackerState {
    pub session: SessionState,
    pub port_name: String,
    /// `VER 0/3/4` reply banners from the last bring-up.
    pub device_banner: Vec<String>,
    pub tool_names: Vec<String>,
    pub tools: Vec<PublishedTool>,
    pub is_tracking: bool,
    pub track_stray_markers: bool,
    pub stray_markers: Array2<f64>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            session: SessionState::Disconnected,
            port_name: String::new(),
            device_banner: Vec::new(),
            tool_names: Vec::new(),
            tools: Vec::new(),
            is_tracking: false,
            track_stray_markers: true,
            stray_markers: Array2::zeros((STRAY_MARKER_ROWS, STRAY_MARKER_COLS)),
        }
    }
}

/// Consumer-side handle onto a spawned tracker task.
pub struct TrackerHandle {
    commands: Sender<TrackerCommand>,
    events: Receiver<TrackerEvent>,
    published: Arc<Mutex<TrackerState>>,
    thread: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    pub fn send(&self, command: TrackerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| TrackerError::TaskStopped)
    }

    /// Snapshot from the most recent completed tick.
    pub fn state(&self) -> TrackerState {
        self.published.lock().unwrap().clone()
    }

    pub fn events(&self) -> &Receiver<TrackerEvent> {
        &self.events
    }

    /// Stop the task (tracking is turned off first) and wait for it.
    pub fn shutdown(self) {
        let TrackerHandle {
            commands, thread, ..
        } = self;
        drop(commands);
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

/// Spawn the tracker task on its own thread.
pub fn spawn(config: TrackerConfig) -> TrackerHandle {
    let (command_tx, command_rx) = crossbeam_channel::bounded(32);
    let (event_tx, event_rx) = crossbeam_channel::unbounded();

    let mut task = TrackerTask::new(config, event_tx);
    let published = task.published();
    let thread = std::thread::spawn(move || task.run(command_rx));

    TrackerHandle {
        commands: command_tx,
        events: event_rx,
        published,
        thread: Some(thread),
    }
}

pub struct TrackerTask {
    config: TrackerConfig,
    period: Duration,
    session: Option<Session>,
    state: SessionState,
    registry: ToolRegistry,
    is_tracking: bool,
    track_stray_markers: bool,
    stray_markers: Array2<f64>,
    device_banner: Vec<String>,
    events: Sender<TrackerEvent>,
    published: Arc<Mutex<TrackerState>>,
}

impl TrackerTask {
    pub fn new(config: TrackerConfig, events: Sender<TrackerEvent>) -> Self {
        let period = config.period();
        let mut task = Self {
            config,
            period,
            session: None,
            state: SessionState::Disconnected,
            registry: ToolRegistry::new(),
            is_tracking: false,
            track_stray_markers: true,
            stray_markers: Array2::zeros((STRAY_MARKER_ROWS, STRAY_MARKER_COLS)),
            device_banner: Vec::new(),
            events,
            published: Arc::new(Mutex::new(TrackerState::default())),
        };
        task.register_configured_tools();
        task
    }

    /// The snapshot cell consumers read from.
    pub fn published(&self) -> Arc<Mutex<TrackerState>> {
        Arc::clone(&self.published)
    }

    pub fn session_state(&self) -> SessionState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.is_tracking
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn register_configured_tools(&mut self) {
        for tool in self.config.tools.clone() {
            if tool.serial_number.len() != 8 || !tool.serial_number.is_ascii() {
                error!(
                    "tool {:?}: serial number {:?} must be 8 ASCII characters",
                    tool.name, tool.serial_number
                );
                continue;
            }

            let definition = tool.definition.as_ref().and_then(|definition| {
                let resolved = self.config.resolve_definition(definition);
                if resolved.is_none() {
                    error!(
                        "tool {:?}: definition {} not found on the search path",
                        tool.name,
                        definition.display()
                    );
                }
                resolved
            });

            let id = match self
                .registry
                .add_tool(&tool.name, &tool.serial_number, definition)
            {
                Ok(id) => id,
                Err(e) => {
                    error!("tool {:?}: {e}", tool.name);
                    continue;
                }
            };

            if let Some(tooltip) = &tool.tooltip {
                if tooltip.rotation.is_some() {
                    error!(
                        "tool {:?}: tooltip rotation is not supported and will not be applied",
                        tool.name
                    );
                }
                if let Some([x, y, z]) = tooltip.translation {
                    self.registry.get_mut(id).tooltip_offset = Vector3::new(x, y, z);
                }
            }
        }

        if !self.registry.is_empty() {
            let _ = self.events.send(TrackerEvent::ToolsUpdated);
        }
    }

    /// Run until every command sender is gone.
    pub fn run(&mut self, commands: Receiver<TrackerCommand>) {
        info!(
            "tracker task running with a {} ms period",
            self.period.as_millis()
        );
        self.publish();

        loop {
            let tick_start = Instant::now();

            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        if let Err(e) = self.execute(command) {
                            error!("command failed: {e}");
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        let _ = self.disconnect();
                        self.publish();
                        info!("tracker task stopping");
                        return;
                    }
                }
            }

            if self.is_tracking {
                // Transient faults drop the tick; the next one reissues TX.
                if let Err(e) = self.track() {
                    warn!("tracking tick dropped: {e}");
                }
            }

            self.publish();

            let elapsed = tick_start.elapsed();
            if elapsed < self.period {
                std::thread::sleep(self.period - elapsed);
            }
        }
    }

    pub fn execute(&mut self, command: TrackerCommand) -> Result<()> {
        match command {
            TrackerCommand::Connect { port } => self.connect(port.as_deref()),
            TrackerCommand::Disconnect => self.disconnect(),
            TrackerCommand::Beep(count) => self.beep(count),
            TrackerCommand::ToggleTracking(on) => self.toggle_tracking(on),
            TrackerCommand::ToggleStrayMarkers(on) => {
                self.track_stray_markers = on;
                Ok(())
            }
            TrackerCommand::ReportStrayMarkers => self.report_stray_markers(),
        }
    }

    // ==================== Connection ====================

    fn connect(&mut self, port: Option<&str>) -> Result<()> {
        if self.session.is_some() {
            self.disconnect()?;
        }

        self.state = SessionState::Opening;
        let configured = port.or(self.config.serial_port.as_deref());
        let session = match discover::find_tracker(configured) {
            Ok(session) => session,
            Err(e) => {
                self.fail_connection();
                return Err(e);
            }
        };
        self.finish_connect(session)
    }

    /// Bring up the tracker on an already opened link. Used by tests
    /// and hosts that manage ports themselves.
    pub fn connect_link(&mut self, link: Box<dyn SerialLink>) -> Result<()> {
        if self.session.is_some() {
            self.disconnect()?;
        }

        self.state = SessionState::Resetting;
        let mut session = Session::new(link);
        if let Err(e) = session.reset() {
            self.fail_connection();
            return Err(e);
        }
        self.finish_connect(session)
    }

    fn finish_connect(&mut self, session: Session) -> Result<()> {
        self.session = Some(session);
        self.state = SessionState::Initializing;

        match self.bring_up() {
            Ok(()) => {
                self.state = SessionState::Ready;
                let port = self
                    .session
                    .as_ref()
                    .map(|session| session.port_name().to_string())
                    .unwrap_or_default();
                info!("connected to tracker on {port}");
                let _ = self.events.send(TrackerEvent::Connected(port));
                Ok(())
            }
            Err(e) => {
                error!("bring-up failed: {e}");
                self.session = None;
                self.fail_connection();
                Err(e)
            }
        }
    }

    fn fail_connection(&mut self) {
        self.state = SessionState::Disconnected;
        let _ = self.events.send(TrackerEvent::Connected(String::new()));
    }

    /// Negotiate the link, validate the firmware, and walk the port
    /// handle lifecycle.
    fn bring_up(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(TrackerError::NotConnected);
        };
        session.set_read_timeout(BRING_UP_READ_TIMEOUT);

        session.configure_link(&LinkSettings::full_speed())?;
        session.command("INIT ")?;
        session.expect("OKAY")?;

        self.device_banner.clear();
        for verb in ["VER 0", "VER 3", "VER 4"] {
            session.command(verb)?;
            std::thread::sleep(VER_SETTLE);
            let banner = session.response()?.to_string();
            info!("{verb}: {}", banner.lines().next().unwrap_or_default());
            self.device_banner.push(banner);
        }

        session.command("VER 5")?;
        std::thread::sleep(VER_SETTLE);
        let firmware = session.response()?.trim_end().to_string();
        if !firmware.starts_with(SUPPORTED_FIRMWARE) {
            return Err(TrackerError::UnsupportedFirmware(firmware));
        }
        info!("firmware revision {SUPPORTED_FIRMWARE}");

        handles::load_tool_definitions(session, &mut self.registry)?;
        handles::initialize_and_query(session, &mut self.registry)?;
        handles::enable(session, &mut self.registry)?;

        session.set_read_timeout(STEADY_READ_TIMEOUT);
        let _ = self.events.send(TrackerEvent::ToolsUpdated);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.session.is_some() {
            if self.is_tracking {
                if let Err(e) = self.toggle_tracking(false) {
                    warn!("could not stop tracking before disconnecting: {e}");
                    self.is_tracking = false;
                }
            }
            self.session = None;
            info!("disconnected");
        }
        self.registry.clear_port_bindings();
        self.state = SessionState::Disconnected;
        let _ = self.events.send(TrackerEvent::Connected(String::new()));
        Ok(())
    }

    // ==================== Commands ====================

    /// Sound the buzzer. The device answers `0` while busy (retried
    /// after a pause) and `1` on success.
    fn beep(&mut self, count: u8) -> Result<()> {
        if !(1..=9).contains(&count) {
            return Err(TrackerError::InvalidArgument(format!(
                "beep count {count} must be within 1..=9"
            )));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(TrackerError::NotConnected);
        };

        loop {
            session.command(&format!("BEEP {count}"))?;
            let payload = session.response()?;
            if payload.starts_with('1') {
                return Ok(());
            }
            if !payload.starts_with('0') {
                return Err(TrackerError::Unexpected {
                    expected: "1".to_string(),
                    received: payload.to_string(),
                });
            }
            debug!("tracker busy, retrying beep");
            std::thread::sleep(BEEP_RETRY);
        }
    }

    fn toggle_tracking(&mut self, track: bool) -> Result<()> {
        if track == self.is_tracking {
            return Ok(());
        }
        let Some(session) = self.session.as_mut() else {
            return Err(TrackerError::NotConnected);
        };

        if track {
            session.command("TSTART 80")?;
        } else {
            session.command("TSTOP ")?;
        }
        session.expect("OKAY")?;

        self.is_tracking = track;
        self.state = if track {
            SessionState::Tracking
        } else {
            SessionState::Ready
        };
        info!("tracking is {}", if track { "on" } else { "off" });
        let _ = self.events.send(TrackerEvent::Tracking(track));
        std::thread::sleep(TRACKING_SETTLE);
        Ok(())
    }

    // ==================== Tracking ====================

    /// One `TX` round trip: parse the reply and fold each row into its
    /// tool record.
    fn track(&mut self) -> Result<()> {
        let options = TxOptions {
            transforms: true,
            stray: self.track_stray_markers,
        };
        let Some(session) = self.session.as_mut() else {
            return Err(TrackerError::NotConnected);
        };

        session.command(options.command())?;
        let payload = session.response_bytes()?.to_vec();
        let reply = tx::parse(&payload, options)?;

        for row in &reply.tools {
            let Some(id) = self.registry.find_by_port(&row.handle) else {
                warn!("no tool for port handle {}", row.handle);
                continue;
            };
            let tool = self.registry.get_mut(id);
            tool.frame_number = row.frame_number;

            match &row.sample {
                ToolSample::Pose(pose) => {
                    let [w, x, y, z] = pose.quaternion;
                    let rotation =
                        UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
                    let translation = Vector3::from(pose.translation);

                    tool.error_rms = pose.error_rms;
                    tool.marker_frame = ToolFrame {
                        rotation,
                        translation,
                        valid: true,
                    };
                    tool.tooltip_frame = ToolFrame {
                        rotation,
                        translation: translation + rotation * tool.tooltip_offset,
                        valid: true,
                    };
                    trace!(
                        "{} at {:.2?} (frame {})",
                        tool.name,
                        tool.tooltip_frame.translation,
                        tool.frame_number
                    );
                }
                sample => {
                    debug!("{} reported {sample:?}", tool.name);
                    tool.marker_frame.valid = false;
                    tool.tooltip_frame.valid = false;
                }
            }
        }

        if let Some(markers) = &reply.stray_markers {
            self.update_stray_markers(markers);
        }
        Ok(())
    }

    /// One `TX 1000` round to refresh the stray marker table, turning
    /// tracking on for the query and restoring it afterwards.
    fn report_stray_markers(&mut self) -> Result<()> {
        let was_tracking = self.is_tracking;
        self.toggle_tracking(true)?;

        let options = TxOptions {
            transforms: false,
            stray: true,
        };
        let outcome = (|| {
            let Some(session) = self.session.as_mut() else {
                return Err(TrackerError::NotConnected);
            };
            session.command(options.command())?;
            let payload = session.response_bytes()?.to_vec();
            Ok(tx::parse(&payload, options)?)
        })();

        match outcome {
            Ok(reply) => {
                if let Some(markers) = &reply.stray_markers {
                    debug!("{} stray markers detected", markers.len());
                    self.update_stray_markers(markers);
                }
                if !was_tracking {
                    self.toggle_tracking(false)?;
                }
                Ok(())
            }
            Err(e) => {
                if !was_tracking {
                    let _ = self.toggle_tracking(false);
                }
                Err(e)
            }
        }
    }

    fn update_stray_markers(&mut self, markers: &[StrayMarker]) {
        self.stray_markers.fill(0.0);
        for (row, marker) in markers.iter().take(STRAY_MARKER_ROWS).enumerate() {
            self.stray_markers[[row, 0]] = 1.0;
            self.stray_markers[[row, 1]] = if marker.in_volume { 1.0 } else { 0.0 };
            self.stray_markers[[row, 2]] = marker.position[0];
            self.stray_markers[[row, 3]] = marker.position[1];
            self.stray_markers[[row, 4]] = marker.position[2];
        }
    }

    // ==================== Publication ====================

    /// Write the tick's snapshot for consumers.
    pub fn publish(&self) {
        let mut state = self.published.lock().unwrap();
        state.session = self.state;
        state.port_name = self
            .session
            .as_ref()
            .map(|session| session.port_name().to_string())
            .unwrap_or_default();
        state.device_banner = self.device_banner.clone();
        state.is_tracking = self.is_tracking;
        state.track_stray_markers = self.track_stray_markers;
        state.stray_markers = self.stray_markers.clone();
        state.tool_names = self
            .registry
            .iter()
            .map(|(_, tool)| tool.name.clone())
            .collect();
        state.tools = self
            .registry
            .iter()
            .map(|(_, tool)| PublishedTool {
                name: tool.name.clone(),
                serial_number: tool.serial_number.clone(),
                tooltip_frame: tool.tooltip_frame.clone(),
                marker_frame: tool.marker_frame.clone(),
                error_rms: tool.error_rms,
                frame_number: tool.frame_number,
            })
            .collect();
    }
}
