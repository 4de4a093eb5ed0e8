//! Typed node-and-pin graph layered on the [`Dag`](crate::dag::Dag).
//!
//! Nodes expose typed input/output [`Pin`]s; connecting an input to an
//! upstream output records the link by global pin id. Pin links are *not*
//! DAG edges by themselves — [`NodeGraph::compile`] promotes every link
//! into a node-level dependency edge, which is where acyclicity is
//! enforced and the execution order comes from.
//!
//! Graphs persist as JSON. Each node object carries `id`, `typeId`, a
//! `type` name for readability, `inputs`/`outputs` arrays of
//! `{id, localId, linkedPin?}` and any node-specific fields. Loading is
//! tolerant: unknown node types and pins that no longer exist are logged
//! and skipped; only a pin entry without `localId` is a hard error.

mod node;
mod pin;
mod registry;

pub use node::GraphNode;
pub use pin::{LocalPinId, Pin, PinDirection, PinId, PinTypeId};
pub use registry::{NodeTypeId, NodeTypeRegistry};

use serde_json::{json, Map, Value};

use crate::dag::{Dag, NodeId};
use crate::error::{GraphicsError, GraphicsResult};

/// Container for nodes, their pins, and the dependency DAG built from pin
/// links.
pub struct NodeGraph<N: ?Sized + GraphNode> {
    dag: Dag<Box<N>>,
    next_pin_id: u64,
}

impl<N: ?Sized + GraphNode> NodeGraph<N> {
    pub fn new() -> Self {
        Self {
            dag: Dag::new(),
            // 0 is the unassigned marker.
            next_pin_id: 1,
        }
    }

    /// Add a node, assigning fresh global ids to all of its pins.
    pub fn add_node(&mut self, mut node: Box<N>) -> NodeId {
        for pin in node.input_pins_mut() {
            pin.assign_id(PinId(self.next_pin_id));
            self.next_pin_id += 1;
        }
        for pin in node.output_pins_mut() {
            pin.assign_id(PinId(self.next_pin_id));
            self.next_pin_id += 1;
        }
        self.dag.add_node(node)
    }

    /// Add a node without touching its pin ids; used by deserialization,
    /// which restores stored ids afterwards.
    fn add_node_raw(&mut self, node: Box<N>) -> NodeId {
        self.dag.add_node(node)
    }

    pub fn node(&self, id: NodeId) -> &N {
        self.dag.node(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut N {
        self.dag.node_mut(id)
    }

    pub fn try_node(&self, id: NodeId) -> Option<&N> {
        self.dag.try_node(id).map(|n| &**n)
    }

    pub fn node_count(&self) -> usize {
        self.dag.node_count()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.dag.node_ids()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> + '_ {
        self.dag.node_ids().map(move |id| (id, self.node(id)))
    }

    /// The dependency DAG. Edges exist only after [`compile`](Self::compile).
    pub fn dag(&self) -> &Dag<Box<N>> {
        &self.dag
    }

    /// Deterministic execution order; empty on a non-empty graph signals an
    /// inconsistency (see [`Dag::topological_order`]).
    pub fn topological_order(&self) -> Vec<NodeId> {
        self.dag.topological_order()
    }

    /// Drop every node and edge. Pin id allocation keeps running so stale
    /// ids from before the clear never collide with new ones.
    pub fn clear(&mut self) {
        self.dag = Dag::new();
    }

    /// Find the node owning the pin with the given global id.
    pub fn pin_owner(&self, pin: PinId) -> Option<NodeId> {
        self.dag
            .node_ids()
            .find(|&id| self.node(id).pin_by_id(pin).is_some())
    }

    /// Connect an output pin to an input pin.
    ///
    /// Returns `false` (with a warning) if either pin is missing, the
    /// directions are wrong, the type tags differ, or both pins sit on the
    /// same node. The link is recorded on the input side; an output may
    /// fan out to any number of inputs.
    pub fn connect(&mut self, from: PinId, to: PinId) -> bool {
        let Some(from_owner) = self.pin_owner(from) else {
            log::warn!("connect: no node owns output pin {from:?}");
            return false;
        };
        let Some(to_owner) = self.pin_owner(to) else {
            log::warn!("connect: no node owns input pin {to:?}");
            return false;
        };
        if from_owner == to_owner {
            log::warn!("connect: cannot connect a node to itself");
            return false;
        }

        let from_pin = self.node(from_owner).pin_by_id(from).expect("pin vanished");
        let to_pin = self.node(to_owner).pin_by_id(to).expect("pin vanished");
        if from_pin.direction() != PinDirection::Output || to_pin.direction() != PinDirection::Input
        {
            log::warn!("connect: {from:?} -> {to:?} must go from an output to an input");
            return false;
        }
        if from_pin.pin_type() != to_pin.pin_type() {
            log::warn!(
                "connect: pin type mismatch ({:?} vs {:?})",
                from_pin.pin_type(),
                to_pin.pin_type()
            );
            return false;
        }

        let node = self.node_mut(to_owner);
        let pin = node
            .input_pins_mut()
            .iter_mut()
            .find(|p| p.id() == to)
            .expect("pin vanished");
        pin.set_linked(Some(from));
        true
    }

    /// Break the link on an input pin. Returns `false` if the pin is
    /// missing or was not connected.
    pub fn disconnect(&mut self, input: PinId) -> bool {
        let Some(owner) = self.pin_owner(input) else {
            return false;
        };
        let node = self.node_mut(owner);
        let Some(pin) = node.input_pins_mut().iter_mut().find(|p| p.id() == input) else {
            return false;
        };
        let was_connected = pin.is_connected();
        pin.set_linked(None);
        was_connected
    }

    /// Promote pin links into DAG edges: wherever an input pin of node B
    /// links to an output pin of node A, A must execute before B.
    ///
    /// Acyclicity is re-validated here rather than trusted: a link set
    /// that would close a cycle makes this return
    /// [`GraphicsError::CyclicGraph`].
    pub fn compile(&mut self) -> GraphicsResult<()> {
        let mut pairs: Vec<(NodeId, NodeId)> = Vec::new();
        for id in self.dag.node_ids() {
            for pin in self.node(id).input_pins() {
                let Some(linked) = pin.linked_pin() else {
                    continue;
                };
                match self.pin_owner(linked) {
                    Some(upstream) => pairs.push((upstream, id)),
                    None => {
                        log::warn!(
                            "input pin {:?} links to missing pin {:?}; link ignored",
                            pin.id(),
                            linked
                        );
                    }
                }
            }
        }

        for (from, to) in pairs {
            if !self.dag.add_edge(from, to) {
                log::error!("pin links between {from:?} and {to:?} close a cycle");
                return Err(GraphicsError::CyclicGraph);
            }
        }
        Ok(())
    }

    /// Serialize the graph to the persisted JSON form.
    pub fn to_json(&self) -> Value {
        fn pins_to_json(pins: &[Pin]) -> Value {
            Value::Array(
                pins.iter()
                    .map(|pin| {
                        let mut entry = Map::new();
                        entry.insert("id".into(), json!(pin.id().0));
                        entry.insert("localId".into(), json!(pin.local_id().0));
                        if let Some(linked) = pin.linked_pin() {
                            entry.insert("linkedPin".into(), json!(linked.0));
                        }
                        Value::Object(entry)
                    })
                    .collect(),
            )
        }

        let nodes: Vec<Value> = self
            .dag
            .node_ids()
            .map(|id| {
                let node = self.node(id);
                let mut entry = Map::new();
                entry.insert("id".into(), json!(id.value()));
                entry.insert("typeId".into(), json!(node.node_type().0));
                entry.insert("type".into(), json!(node.type_name()));
                entry.insert("inputs".into(), pins_to_json(node.input_pins()));
                entry.insert("outputs".into(), pins_to_json(node.output_pins()));
                node.serialize_state(&mut entry);
                Value::Object(entry)
            })
            .collect();

        json!({ "nodes": nodes })
    }

    /// Rebuild a graph from its persisted JSON form.
    ///
    /// Unknown node types and stale pin references are logged and skipped;
    /// a pin entry without a `localId` field is a hard error.
    pub fn from_json(value: &Value, registry: &NodeTypeRegistry<N>) -> GraphicsResult<Self> {
        let mut graph = Self::new();
        let Some(stored_nodes) = value.get("nodes").and_then(Value::as_array) else {
            return Err(GraphicsError::DeserializationFailed(
                "missing 'nodes' array".into(),
            ));
        };

        let mut pending_links: Vec<(PinId, PinId)> = Vec::new();
        let mut max_pin_id = 0u64;

        for stored in stored_nodes {
            let Some(type_id) = stored.get("typeId").and_then(Value::as_u64) else {
                return Err(GraphicsError::DeserializationFailed(
                    "node entry missing 'typeId'".into(),
                ));
            };
            let type_id = NodeTypeId(type_id);
            let Some(mut node) = registry.create(type_id) else {
                log::warn!("unknown node type {:#018x}; node skipped", type_id.0);
                continue;
            };
            if let Err(error) = node.deserialize_state(stored) {
                log::warn!(
                    "failed to restore state of '{}' node: {error}; defaults kept",
                    node.type_name()
                );
            }
            let node_id = graph.add_node_raw(node);

            for (key, is_input) in [("inputs", true), ("outputs", false)] {
                let Some(stored_pins) = stored.get(key).and_then(Value::as_array) else {
                    continue;
                };
                for stored_pin in stored_pins {
                    let Some(local_id) = stored_pin.get("localId").and_then(Value::as_u64) else {
                        return Err(GraphicsError::DeserializationFailed(
                            "pin entry missing 'localId'".into(),
                        ));
                    };
                    let local_id = LocalPinId(local_id as u32);
                    let type_name = graph.node(node_id).type_name();

                    let node = graph.node_mut(node_id);
                    let pins = if is_input {
                        node.input_pins_mut()
                    } else {
                        node.output_pins_mut()
                    };
                    let Some(pin) = pins.iter_mut().find(|p| p.local_id() == local_id) else {
                        log::warn!(
                            "stored {} pin with local id {} no longer exists on '{}'; skipped",
                            key,
                            local_id.0,
                            type_name
                        );
                        continue;
                    };

                    if let Some(id) = stored_pin.get("id").and_then(Value::as_u64) {
                        pin.assign_id(PinId(id));
                        max_pin_id = max_pin_id.max(id);
                    }
                    if is_input {
                        if let Some(linked) = stored_pin.get("linkedPin").and_then(Value::as_u64) {
                            let pin_id = pin.id();
                            pending_links.push((pin_id, PinId(linked)));
                        }
                    }
                }
            }
        }

        // Fresh ids for any pin the file did not cover, past every stored id.
        graph.next_pin_id = graph.next_pin_id.max(max_pin_id + 1);
        let ids: Vec<NodeId> = graph.dag.node_ids().collect();
        for node_id in ids {
            let mut next = graph.next_pin_id;
            {
                let node = graph.node_mut(node_id);
                for pin in node.input_pins_mut() {
                    if !pin.id().is_assigned() {
                        pin.assign_id(PinId(next));
                        next += 1;
                    }
                }
                for pin in node.output_pins_mut() {
                    if !pin.id().is_assigned() {
                        pin.assign_id(PinId(next));
                        next += 1;
                    }
                }
            }
            graph.next_pin_id = next;
        }

        for (input, linked) in pending_links {
            if graph.pin_owner(linked).is_none() {
                log::warn!("pin {input:?} links to missing pin {linked:?}; connection dropped");
                continue;
            }
            let Some(owner) = graph.pin_owner(input) else {
                continue;
            };
            let node = graph.node_mut(owner);
            if let Some(pin) = node.input_pins_mut().iter_mut().find(|p| p.id() == input) {
                pin.set_linked(Some(linked));
            }
        }

        Ok(graph)
    }
}

impl<N: ?Sized + GraphNode> Default for NodeGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIN_VALUE: PinTypeId = PinTypeId(1);
    const PIN_OTHER: PinTypeId = PinTypeId(2);

    const TEST_NODE: NodeTypeId = NodeTypeId::from_name("TestNode");

    struct TestNode {
        inputs: Vec<Pin>,
        outputs: Vec<Pin>,
        label: String,
    }

    impl TestNode {
        fn new() -> Self {
            Self {
                inputs: vec![Pin::input(0, PIN_VALUE), Pin::input(1, PIN_OTHER)],
                outputs: vec![Pin::output(0, PIN_VALUE)],
                label: String::new(),
            }
        }
    }

    impl GraphNode for TestNode {
        fn node_type(&self) -> NodeTypeId {
            TEST_NODE
        }

        fn type_name(&self) -> &'static str {
            "TestNode"
        }

        fn input_pins(&self) -> &[Pin] {
            &self.inputs
        }

        fn input_pins_mut(&mut self) -> &mut [Pin] {
            &mut self.inputs
        }

        fn output_pins(&self) -> &[Pin] {
            &self.outputs
        }

        fn output_pins_mut(&mut self) -> &mut [Pin] {
            &mut self.outputs
        }

        fn serialize_state(&self, out: &mut Map<String, Value>) {
            out.insert("label".into(), json!(self.label));
        }

        fn deserialize_state(&mut self, value: &Value) -> GraphicsResult<()> {
            if let Some(label) = value.get("label").and_then(Value::as_str) {
                self.label = label.to_string();
            }
            Ok(())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn registry() -> NodeTypeRegistry<dyn GraphNode> {
        let mut registry: NodeTypeRegistry<dyn GraphNode> = NodeTypeRegistry::new();
        registry.register(TEST_NODE, "TestNode", || Box::new(TestNode::new()));
        registry
    }

    fn graph_with_two_nodes() -> (NodeGraph<dyn GraphNode>, NodeId, NodeId) {
        let mut graph: NodeGraph<dyn GraphNode> = NodeGraph::new();
        let a = graph.add_node(Box::new(TestNode::new()));
        let b = graph.add_node(Box::new(TestNode::new()));
        (graph, a, b)
    }

    #[test]
    fn test_add_node_assigns_pin_ids() {
        let (graph, a, b) = graph_with_two_nodes();
        let mut seen = std::collections::HashSet::new();
        for id in [a, b] {
            for pin in graph
                .node(id)
                .input_pins()
                .iter()
                .chain(graph.node(id).output_pins())
            {
                assert!(pin.id().is_assigned());
                assert!(seen.insert(pin.id()), "duplicate pin id {:?}", pin.id());
            }
        }
    }

    #[test]
    fn test_connect_and_compile() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let out = graph.node(a).output_pin(0).id();
        let input = graph.node(b).input_pin(0).id();

        assert!(graph.connect(out, input));
        assert!(graph.node(b).input_pin(0).is_connected());

        graph.compile().unwrap();
        assert!(graph.dag().has_edge(a, b));
        assert_eq!(graph.topological_order(), vec![a, b]);
    }

    #[test]
    fn test_connect_rejects_type_mismatch() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let out = graph.node(a).output_pin(0).id();
        // Input pin 1 carries a different type tag.
        let input = graph.node(b).input_pin(1).id();
        assert!(!graph.connect(out, input));
    }

    #[test]
    fn test_connect_rejects_wrong_direction() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let out_a = graph.node(a).output_pin(0).id();
        let out_b = graph.node(b).output_pin(0).id();
        assert!(!graph.connect(out_a, out_b));
    }

    #[test]
    fn test_connect_rejects_same_node() {
        let (mut graph, a, _) = graph_with_two_nodes();
        let out = graph.node(a).output_pin(0).id();
        let input = graph.node(a).input_pin(0).id();
        assert!(!graph.connect(out, input));
    }

    #[test]
    fn test_fan_out_to_two_consumers() {
        let mut graph: NodeGraph<dyn GraphNode> = NodeGraph::new();
        let a = graph.add_node(Box::new(TestNode::new()));
        let b = graph.add_node(Box::new(TestNode::new()));
        let c = graph.add_node(Box::new(TestNode::new()));
        let out = graph.node(a).output_pin(0).id();

        assert!(graph.connect(out, graph.node(b).input_pin(0).id()));
        assert!(graph.connect(out, graph.node(c).input_pin(0).id()));

        graph.compile().unwrap();
        assert!(graph.dag().has_edge(a, b));
        assert!(graph.dag().has_edge(a, c));
    }

    #[test]
    fn test_compile_detects_cycle() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let out_a = graph.node(a).output_pin(0).id();
        let out_b = graph.node(b).output_pin(0).id();
        let in_a = graph.node(a).input_pin(0).id();
        let in_b = graph.node(b).input_pin(0).id();

        assert!(graph.connect(out_a, in_b));
        assert!(graph.connect(out_b, in_a));

        assert_eq!(graph.compile(), Err(GraphicsError::CyclicGraph));
    }

    #[test]
    fn test_disconnect() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let out = graph.node(a).output_pin(0).id();
        let input = graph.node(b).input_pin(0).id();
        assert!(graph.connect(out, input));

        assert!(graph.disconnect(input));
        assert!(!graph.node(b).input_pin(0).is_connected());
        assert!(!graph.disconnect(input));
    }

    #[test]
    fn test_json_round_trip() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let out = graph.node(a).output_pin(0).id();
        let input = graph.node(b).input_pin(0).id();
        assert!(graph.connect(out, input));
        graph
            .node_mut(a)
            .as_any_mut()
            .downcast_mut::<TestNode>()
            .unwrap()
            .label = "shadow".to_string();

        let json = graph.to_json();
        let restored = NodeGraph::from_json(&json, &registry()).unwrap();

        assert_eq!(restored.node_count(), 2);
        let ids: Vec<NodeId> = restored.node_ids().collect();
        for &id in &ids {
            assert_eq!(restored.node(id).node_type(), TEST_NODE);
        }

        // Connection survives by global pin id.
        let consumer = ids
            .iter()
            .find(|&&id| restored.node(id).input_pin(0).is_connected())
            .copied()
            .expect("connection lost in round trip");
        assert_eq!(
            restored.node(consumer).input_pin(0).linked_pin(),
            Some(out)
        );

        // Node state survives.
        let labels: Vec<String> = ids
            .iter()
            .map(|&id| {
                restored
                    .node(id)
                    .as_any()
                    .downcast_ref::<TestNode>()
                    .unwrap()
                    .label
                    .clone()
            })
            .collect();
        assert!(labels.contains(&"shadow".to_string()));
    }

    #[test]
    fn test_round_trip_then_compile_matches() {
        let (mut graph, _, _) = graph_with_two_nodes();
        let ids: Vec<NodeId> = graph.node_ids().collect();
        let out = graph.node(ids[0]).output_pin(0).id();
        let input = graph.node(ids[1]).input_pin(0).id();
        assert!(graph.connect(out, input));

        let mut restored = NodeGraph::from_json(&graph.to_json(), &registry()).unwrap();
        restored.compile().unwrap();
        assert_eq!(restored.topological_order().len(), 2);
        assert_eq!(restored.dag().edge_count(), 1);
    }

    #[test]
    fn test_missing_local_id_is_fatal() {
        let json = json!({
            "nodes": [{
                "id": 0,
                "typeId": TEST_NODE.0,
                "inputs": [{ "id": 5 }],
                "outputs": []
            }]
        });
        let result = NodeGraph::from_json(&json, &registry());
        assert!(matches!(
            result,
            Err(GraphicsError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn test_stale_pin_is_skipped() {
        // Local id 9 does not exist on TestNode; the pin entry is dropped
        // but the node still loads.
        let json = json!({
            "nodes": [{
                "id": 0,
                "typeId": TEST_NODE.0,
                "inputs": [{ "id": 5, "localId": 9 }],
                "outputs": [{ "id": 6, "localId": 0 }]
            }]
        });
        let graph = NodeGraph::from_json(&json, &registry()).unwrap();
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_unknown_node_type_is_skipped() {
        let json = json!({
            "nodes": [
                { "id": 0, "typeId": 0xdead_beefu64, "inputs": [], "outputs": [] },
                { "id": 1, "typeId": TEST_NODE.0, "inputs": [], "outputs": [] }
            ]
        });
        let graph = NodeGraph::from_json(&json, &registry()).unwrap();
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_link_to_missing_pin_is_dropped() {
        let json = json!({
            "nodes": [{
                "id": 0,
                "typeId": TEST_NODE.0,
                "inputs": [{ "id": 2, "localId": 0, "linkedPin": 777 }],
                "outputs": [{ "id": 3, "localId": 0 }]
            }]
        });
        let graph = NodeGraph::from_json(&json, &registry()).unwrap();
        let id = graph.node_ids().next().unwrap();
        assert!(!graph.node(id).input_pin(0).is_connected());
    }
}
