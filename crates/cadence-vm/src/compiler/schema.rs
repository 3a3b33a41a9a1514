//! Schema registry: compile-time name to type resolution

use cadence_types::ValueType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a document may use a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Read-only live state
    Input,
    /// Written by assignments
    Output,
    /// Intent channel, written by intent statements (value + urgency)
    Channel,
}

/// Declared type and access of one variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSchema {
    #[serde(rename = "type")]
    pub ty: ValueType,
    pub access: Access,
}

impl VariableSchema {
    pub fn new(ty: ValueType, access: Access) -> Self {
        Self { ty, access }
    }
}

/// Source of variable declarations used during semantic analysis
pub trait SchemaRegistry {
    /// Look up a fully qualified name (`"combat.stamina"` or `"stamina"`)
    fn lookup(&self, qualified: &str) -> Option<VariableSchema>;

    /// Whether any variable lives under `namespace`
    fn has_namespace(&self, namespace: &str) -> bool;
}

/// In-memory registry, built in code or deserialized from JSON
///
/// ```json
/// { "variables": { "combat.stamina": { "type": "number", "access": "input" } } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticSchemaRegistry {
    #[serde(default)]
    variables: BTreeMap<String, VariableSchema>,
}

impl StaticSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, schema: VariableSchema) {
        self.variables.insert(name.into(), schema);
    }

    pub fn with(mut self, name: impl Into<String>, schema: VariableSchema) -> Self {
        self.insert(name, schema);
        self
    }

    pub fn input(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.with(name, VariableSchema::new(ty, Access::Input))
    }

    pub fn output(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.with(name, VariableSchema::new(ty, Access::Output))
    }

    pub fn channel(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.with(name, VariableSchema::new(ty, Access::Channel))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl SchemaRegistry for StaticSchemaRegistry {
    fn lookup(&self, qualified: &str) -> Option<VariableSchema> {
        self.variables.get(qualified).copied()
    }

    fn has_namespace(&self, namespace: &str) -> bool {
        self.variables.keys().any(|name| {
            name.strip_prefix(namespace)
                .is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces() {
        let registry = StaticSchemaRegistry::new()
            .input("combat.stamina", ValueType::Number)
            .output("action", ValueType::String);

        assert!(registry.has_namespace("combat"));
        assert!(!registry.has_namespace("comb"));
        assert!(!registry.has_namespace("action"));
        assert_eq!(
            registry.lookup("combat.stamina"),
            Some(VariableSchema::new(ValueType::Number, Access::Input))
        );
        assert_eq!(registry.lookup("stamina"), None);
    }

    #[test]
    fn test_deserialize_registry() {
        let json = r#"{
            "variables": {
                "combat.enemy_staggered": { "type": "bool", "access": "input" },
                "locomotion": { "type": "vector3", "access": "channel" }
            }
        }"#;
        let registry: StaticSchemaRegistry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.lookup("locomotion").map(|s| s.access),
            Some(Access::Channel)
        );
    }
}
