//! Tool records and registry
//!
//! A [`Tool`] is one tracked object: its identity (serial number, the
//! metadata reported by `PHINF`) and its live pose. The registry owns
//! every record in an arena indexed by stable [`ToolId`]s; the name and
//! port handle maps hold ids only, so nothing is owned twice.

use std::collections::HashMap;
use std::path::PathBuf;

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, info};

use ndi::ToolInfo;

use crate::error::{Result, TrackerError};

/// Stable identifier of a tool within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToolId(usize);

/// A rigid frame with a validity flag. When a tool drops out of view
/// the flag goes false and the pose keeps its last good value.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFrame {
    pub rotation: UnitQuaternion<f64>,
    /// Millimetres.
    pub translation: Vector3<f64>,
    pub valid: bool,
}

impl Default for ToolFrame {
    fn default() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            valid: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Tool {
    pub name: String,
    /// 8 ASCII characters, unique per physical tool.
    pub serial_number: String,
    /// Definition to upload before enabling (passive tools only).
    pub definition_path: Option<PathBuf>,
    /// Device-assigned 2-character handle; empty until assigned.
    pub port_handle: String,
    /// 2 hex digits: 01 reference, 02 probe, 03 button box, 04
    /// software-defined, 0A C-arm.
    pub main_type: String,
    pub manufacturer_id: String,
    pub tool_revision: String,
    pub part_number: String,
    /// Tip offset in the tool frame, applied after rotation.
    pub tooltip_offset: Vector3<f64>,
    pub tooltip_frame: ToolFrame,
    pub marker_frame: ToolFrame,
    pub error_rms: f64,
    pub frame_number: u32,
}

impl Tool {
    /// Fold the metadata from a `PHINF` reply into this record.
    pub fn apply_info(&mut self, info: &ToolInfo) {
        self.main_type = info.main_type.clone();
        self.manufacturer_id = info.manufacturer_id.clone();
        self.tool_revision = info.tool_revision.clone();
        self.part_number = info.part_number.clone();
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    by_name: HashMap<String, ToolId>,
    by_port: HashMap<String, ToolId>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. A duplicate serial number returns the existing
    /// record unchanged; a duplicate name under a new serial is an
    /// error.
    pub fn add_tool(
        &mut self,
        name: &str,
        serial_number: &str,
        definition_path: Option<PathBuf>,
    ) -> Result<ToolId> {
        if let Some(id) = self.find_by_serial(serial_number) {
            debug!("tool with serial {serial_number} already registered, keeping {:?}", self.get(id).name);
            return Ok(id);
        }
        if self.by_name.contains_key(name) {
            return Err(TrackerError::DuplicateName(name.to_string()));
        }

        let id = ToolId(self.tools.len());
        self.tools.push(Tool {
            name: name.to_string(),
            serial_number: serial_number.to_string(),
            definition_path,
            ..Tool::default()
        });
        self.by_name.insert(name.to_string(), id);
        info!("registered tool {name:?} with serial number {serial_number}");
        Ok(id)
    }

    pub fn get(&self, id: ToolId) -> &Tool {
        &self.tools[id.0]
    }

    pub fn get_mut(&mut self, id: ToolId) -> &mut Tool {
        &mut self.tools[id.0]
    }

    pub fn find_by_serial(&self, serial_number: &str) -> Option<ToolId> {
        self.tools
            .iter()
            .position(|tool| tool.serial_number == serial_number)
            .map(ToolId)
    }

    pub fn find_by_name(&self, name: &str) -> Option<ToolId> {
        self.by_name.get(name).copied()
    }

    pub fn find_by_port(&self, port_handle: &str) -> Option<ToolId> {
        self.by_port.get(port_handle).copied()
    }

    /// Associate a port handle with a tool for this connection.
    pub fn bind_port(&mut self, port_handle: &str, id: ToolId) {
        debug!(
            "associating {:?} with port handle {port_handle}",
            self.get(id).name
        );
        self.tools[id.0].port_handle = port_handle.to_string();
        self.by_port.insert(port_handle.to_string(), id);
    }

    /// Drop all port associations (handles are reassigned on every
    /// connection).
    pub fn clear_port_bindings(&mut self) {
        self.by_port.clear();
        for tool in &mut self.tools {
            tool.port_handle.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.tools.get(index).map(|tool| tool.name.as_str())
    }

    pub fn ids(&self) -> Vec<ToolId> {
        (0..self.tools.len()).map(ToolId).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ToolId, &Tool)> {
        self.tools
            .iter()
            .enumerate()
            .map(|(index, tool)| (ToolId(index), tool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let mut registry = ToolRegistry::new();
        let id = registry.add_tool("probe", "12345678", None).unwrap();
        assert_eq!(registry.get(id).name, "probe");
        assert_eq!(registry.find_by_serial("12345678"), Some(id));
        assert_eq!(registry.find_by_name("probe"), Some(id));
        assert_eq!(registry.name_at(0), Some("probe"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_serial_returns_existing() {
        let mut registry = ToolRegistry::new();
        let first = registry.add_tool("probe", "12345678", None).unwrap();
        let second = registry.add_tool("other", "12345678", None).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.get(second).name, "probe");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ToolRegistry::new();
        registry.add_tool("probe", "12345678", None).unwrap();
        assert!(matches!(
            registry.add_tool("probe", "87654321", None),
            Err(TrackerError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_port_binding() {
        let mut registry = ToolRegistry::new();
        let id = registry.add_tool("probe", "12345678", None).unwrap();
        registry.bind_port("0A", id);
        assert_eq!(registry.find_by_port("0A"), Some(id));
        assert_eq!(registry.get(id).port_handle, "0A");

        registry.clear_port_bindings();
        assert_eq!(registry.find_by_port("0A"), None);
        assert!(registry.get(id).port_handle.is_empty());
    }

    #[test]
    fn test_default_frames_invalid() {
        let mut registry = ToolRegistry::new();
        let id = registry.add_tool("probe", "12345678", None).unwrap();
        assert!(!registry.get(id).tooltip_frame.valid);
        assert!(!registry.get(id).marker_frame.valid);
    }
}
