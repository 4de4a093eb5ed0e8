//! Node type factory.
//!
//! The registry is an explicit object with its own lifetime: it is built
//! once at application start and passed by reference to whatever needs to
//! instantiate nodes (graph deserialization, editor palettes). There is no
//! process-global registration, which keeps initialization order
//! deterministic and lets tests build isolated registries.

use std::collections::HashMap;

use crate::hash::fnv1a_64;

/// Stable hash identifying a node type across runs and saved graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeTypeId(pub u64);

impl NodeTypeId {
    /// Derive the id from the type name.
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a_64(name.as_bytes()))
    }
}

type Constructor<N> = Box<dyn Fn() -> Box<N> + Send + Sync>;

/// Factory mapping [`NodeTypeId`] to node constructors.
pub struct NodeTypeRegistry<N: ?Sized> {
    constructors: HashMap<NodeTypeId, (&'static str, Constructor<N>)>,
}

impl<N: ?Sized> NodeTypeRegistry<N> {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor for `type_id`.
    ///
    /// # Panics
    ///
    /// Panics if the type is already registered; double registration is a
    /// logic bug, not a recoverable condition.
    pub fn register<F>(&mut self, type_id: NodeTypeId, name: &'static str, constructor: F)
    where
        F: Fn() -> Box<N> + Send + Sync + 'static,
    {
        let previous = self
            .constructors
            .insert(type_id, (name, Box::new(constructor)));
        assert!(
            previous.is_none(),
            "node type '{name}' ({type_id:?}) registered twice"
        );
        log::debug!("registered node type '{}' ({:?})", name, type_id);
    }

    /// Instantiate a node of the given type, or `None` if unknown.
    pub fn create(&self, type_id: NodeTypeId) -> Option<Box<N>> {
        self.constructors.get(&type_id).map(|(_, ctor)| ctor())
    }

    pub fn is_registered(&self, type_id: NodeTypeId) -> bool {
        self.constructors.contains_key(&type_id)
    }

    /// Registered type name, for diagnostics.
    pub fn type_name(&self, type_id: NodeTypeId) -> Option<&'static str> {
        self.constructors.get(&type_id).map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl<N: ?Sized> Default for NodeTypeRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_id_stability() {
        assert_eq!(
            NodeTypeId::from_name("ShaderNode"),
            NodeTypeId::from_name("ShaderNode")
        );
        assert_ne!(
            NodeTypeId::from_name("ShaderNode"),
            NodeTypeId::from_name("FixedShaderNode")
        );
    }

    #[test]
    fn test_register_and_create() {
        let mut registry: NodeTypeRegistry<u32> = NodeTypeRegistry::new();
        let id = NodeTypeId::from_name("test");
        registry.register(id, "test", || Box::new(7u32));

        assert!(registry.is_registered(id));
        assert_eq!(registry.type_name(id), Some("test"));
        assert_eq!(registry.create(id).as_deref(), Some(&7));
        assert_eq!(registry.create(NodeTypeId::from_name("unknown")), None);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_double_registration_panics() {
        let mut registry: NodeTypeRegistry<u32> = NodeTypeRegistry::new();
        let id = NodeTypeId::from_name("test");
        registry.register(id, "test", || Box::new(1u32));
        registry.register(id, "test", || Box::new(2u32));
    }
}
