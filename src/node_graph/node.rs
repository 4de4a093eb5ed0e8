//! The node abstraction layered on the DAG.

use serde_json::Value;

use crate::error::GraphicsResult;
use crate::node_graph::pin::{LocalPinId, Pin, PinId};
use crate::node_graph::registry::NodeTypeId;

/// Behavior shared by every node that can live in a
/// [`NodeGraph`](super::NodeGraph).
///
/// Node types are chosen at graph-load time, so everything here is dynamic
/// dispatch; concrete types are produced by a
/// [`NodeTypeRegistry`](super::NodeTypeRegistry) keyed by
/// [`node_type`](Self::node_type).
///
/// Implementations own their pins as plain vectors; the accessors below
/// expose them so the graph can assign global ids and serialize
/// connections without knowing the concrete type.
pub trait GraphNode: Send + Sync {
    /// Stable type hash, derived from the type name.
    fn node_type(&self) -> NodeTypeId;

    /// Human-readable type name (for logs and diagnostics).
    fn type_name(&self) -> &'static str;

    fn input_pins(&self) -> &[Pin];
    fn input_pins_mut(&mut self) -> &mut [Pin];
    fn output_pins(&self) -> &[Pin];
    fn output_pins_mut(&mut self) -> &mut [Pin];

    /// Write node-specific fields into the serialized node object.
    fn serialize_state(&self, _out: &mut serde_json::Map<String, Value>) {}

    /// Restore node-specific fields from the serialized node object.
    fn deserialize_state(&mut self, _value: &Value) -> GraphicsResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    // Pin lookup helpers. Pin counts are single digits, so linear scans
    // are fine here.

    fn input_pin_count(&self) -> usize {
        self.input_pins().len()
    }

    fn output_pin_count(&self) -> usize {
        self.output_pins().len()
    }

    /// Input pin by ordinal.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    fn input_pin(&self, index: usize) -> &Pin {
        &self.input_pins()[index]
    }

    /// Output pin by ordinal.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    fn output_pin(&self, index: usize) -> &Pin {
        &self.output_pins()[index]
    }

    fn input_pin_by_local_id(&self, local_id: LocalPinId) -> Option<&Pin> {
        self.input_pins().iter().find(|p| p.local_id() == local_id)
    }

    fn output_pin_by_local_id(&self, local_id: LocalPinId) -> Option<&Pin> {
        self.output_pins().iter().find(|p| p.local_id() == local_id)
    }

    /// Any pin (inputs scanned first, then outputs) by global id.
    fn pin_by_id(&self, id: PinId) -> Option<&Pin> {
        self.input_pins()
            .iter()
            .chain(self.output_pins().iter())
            .find(|p| p.id() == id)
    }
}
