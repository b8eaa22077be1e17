//! Port handle lifecycle
//!
//! The tracker assigns a 2-character port handle to every wired tool
//! and to every passive tool whose definition the host uploads. Before
//! tracking can start the handles walk free → initialize → enable,
//! driven by three `PHSR` queries. `PHINF` ties each handle back to a
//! physical tool via its serial number.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use ndi::{phinf, phsr, rom};

use crate::error::{Result, TrackerError};
use crate::session::Session;
use crate::tools::ToolRegistry;

/// Retry limit for the all-zero serial number fault of Aurora USB
/// interfaces. The workaround re-runs initialize+query; without a bound
/// a dead tool would wedge the bring-up forever.
const ZERO_SERIAL_RETRIES: usize = 3;

/// Pause before retrying after an all-zero serial number.
const ZERO_SERIAL_BACKOFF: Duration = Duration::from_millis(500);

/// `PENA` mode for a tool's main type: references are tracked as
/// static, probes and their kin as dynamic, button boxes as buttons.
fn enable_mode(main_type: &str) -> Result<char> {
    match main_type {
        "01" => Ok('S'),
        "02" | "04" | "0A" => Ok('D'),
        "03" => Ok('B'),
        other => Err(TrackerError::UnknownToolType(other.to_string())),
    }
}

/// Ask `PHSR <option>` for handles in one lifecycle state.
fn handles_in_state(session: &mut Session, option: &str) -> Result<Vec<phsr::HandleRecord>> {
    session.command(&format!("PHSR {option}"))?;
    let payload = session.response()?.as_bytes().to_vec();
    Ok(phsr::parse(&payload)?)
}

/// Free stale handles and initialize fresh ones.
pub fn initialize(session: &mut Session) -> Result<()> {
    for record in handles_in_state(session, "01")? {
        session.command(&format!("PHF {}", record.handle))?;
        session.expect("OKAY")?;
        debug!("freed port handle {}", record.handle);
    }

    for record in handles_in_state(session, "02")? {
        session.command(&format!("PINIT {}", record.handle))?;
        session.expect("OKAY")?;
        debug!("initialized port handle {}", record.handle);
    }
    Ok(())
}

pub enum QueryOutcome {
    Complete,
    /// A handle reported the all-zero serial number; the pass must be
    /// re-run after a pause.
    TransientZeroSerial,
}

/// Enumerate all handles and tie each to a tool record. Tools not
/// registered from configuration are added under a generated
/// `<main type>-<serial>` name.
pub fn query(session: &mut Session, registry: &mut ToolRegistry) -> Result<QueryOutcome> {
    let records = handles_in_state(session, "00")?;
    debug!("{} tools are plugged in", records.len());
    registry.clear_port_bindings();

    for record in records {
        session.command(&format!("PHINF {}0021", record.handle))?;
        let payload = session.response()?.as_bytes().to_vec();
        let info = phinf::parse(&payload)?;

        if info.is_placeholder_serial() {
            debug!(
                "port handle {} reported an all-zero serial number",
                record.handle
            );
            return Ok(QueryOutcome::TransientZeroSerial);
        }

        let serial = info.disambiguated_serial();
        let id = match registry.find_by_serial(&serial) {
            Some(id) => id,
            None => {
                let name = format!("{}-{}", info.main_type, serial);
                registry.add_tool(&name, &serial, None)?
            }
        };

        registry.get_mut(id).apply_info(&info);
        registry.bind_port(&record.handle, id);

        let tool = registry.get(id);
        debug!(
            "port handle {}: main type {}, manufacturer {}, revision {}, serial {}, part {:?}",
            record.handle,
            tool.main_type,
            tool.manufacturer_id.trim_end(),
            tool.tool_revision,
            tool.serial_number,
            tool.part_number,
        );
    }
    Ok(QueryOutcome::Complete)
}

/// Run initialize+query, retrying around the Aurora zero-serial fault.
pub fn initialize_and_query(session: &mut Session, registry: &mut ToolRegistry) -> Result<()> {
    for attempt in 0..ZERO_SERIAL_RETRIES {
        initialize(session)?;
        match query(session, registry)? {
            QueryOutcome::Complete => return Ok(()),
            QueryOutcome::TransientZeroSerial => {
                warn!(
                    "all-zero serial number on attempt {}, re-running handle query",
                    attempt + 1
                );
                std::thread::sleep(ZERO_SERIAL_BACKOFF);
            }
        }
    }
    // Give up on the faulted tool rather than blocking the connection;
    // the handles that did resolve stay usable.
    error!("all-zero serial number persisted after {ZERO_SERIAL_RETRIES} attempts");
    Ok(())
}

/// Enable every handle reported by `PHSR 03`. A handle whose tool has
/// an unrecognized main type is skipped, not fatal.
pub fn enable(session: &mut Session, registry: &mut ToolRegistry) -> Result<()> {
    for record in handles_in_state(session, "03")? {
        let Some(id) = registry.find_by_port(&record.handle) else {
            warn!("no tool for port handle {}", record.handle);
            continue;
        };

        let mode = match enable_mode(&registry.get(id).main_type) {
            Ok(mode) => mode,
            Err(e) => {
                warn!("not enabling {:?}: {e}", registry.get(id).name);
                continue;
            }
        };

        session.command(&format!("PENA {}{}", record.handle, mode))?;
        session.expect("OKAY")?;
        debug!("enabled port handle {} as {mode}", record.handle);
    }
    Ok(())
}

/// Read and validate one definition file, split into `PVWR` chunks.
fn definition_chunks(path: &std::path::Path) -> Result<Vec<rom::PvwrChunk>> {
    let data = std::fs::read(path).map_err(|e| {
        TrackerError::Config(format!("cannot read tool definition {}: {e}", path.display()))
    })?;

    let rom_info = rom::validate(&data).map_err(|source| TrackerError::Definition {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "{}: {} markers, main type {:#04x}",
        path.display(),
        rom_info.marker_count,
        rom_info.main_type
    );

    rom::pvwr_chunks(&data).map_err(|source| TrackerError::Definition {
        path: path.to_path_buf(),
        source,
    })
}

/// Upload the `.rom` definition of every registered passive tool and
/// bind the handle the device assigns for it. A tool whose definition
/// cannot be read or validated is skipped; the rest still load.
pub fn load_tool_definitions(session: &mut Session, registry: &mut ToolRegistry) -> Result<()> {
    for id in registry.ids() {
        let Some(path) = registry.get(id).definition_path.clone() else {
            continue;
        };

        let chunks = match definition_chunks(&path) {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("not loading {:?}: {e}", registry.get(id).name);
                continue;
            }
        };

        // Request a handle for the wireless tool.
        session.command("PHRQ *********1****")?;
        let reply = session.response()?;
        if reply.len() < 2 {
            return Err(TrackerError::Protocol(ndi::ParseError::Truncated {
                needed: 2,
                remaining: reply.len(),
            }));
        }
        let handle = reply[..2].to_string();
        info!("loading {:?} on port handle {handle}", registry.get(id).name);

        for chunk in &chunks {
            session.command(&format!("PVWR {handle}{}{}", chunk.address, chunk.hex))?;
            session.expect("OKAY")?;
        }

        registry.bind_port(&handle, id);
    }
    Ok(())
}
