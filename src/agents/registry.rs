//! Agent registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::AgentDefinition;
use crate::error::RegistryError;
use crate::tools::ToolRegistry;

/// Registered agents, in registration order.
///
/// # Invariants
/// - Names are unique
/// - Built at startup and shared read-only afterwards
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<AgentDefinition>>,
    by_name: HashMap<String, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: AgentDefinition) -> Result<(), RegistryError> {
        if self.by_name.contains_key(agent.name()) {
            return Err(RegistryError::DuplicateName(agent.name().to_string()));
        }
        tracing::debug!(agent = agent.name(), "Registered agent");
        self.by_name
            .insert(agent.name().to_string(), self.agents.len());
        self.agents.push(Arc::new(agent));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&AgentDefinition, RegistryError> {
        self.by_name
            .get(name)
            .map(|&i| self.agents[i].as_ref())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Shared handle to a registered agent.
    pub fn get_shared(&self, name: &str) -> Result<Arc<AgentDefinition>, RegistryError> {
        self.by_name
            .get(name)
            .map(|&i| Arc::clone(&self.agents[i]))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Agents carrying `tag`, in registration order. Empty if none.
    pub fn find_by_capability(&self, tag: &str) -> Vec<&AgentDefinition> {
        self.agents
            .iter()
            .filter(|a| a.has_capability(tag))
            .map(|a| a.as_ref())
            .collect()
    }

    pub fn list(&self) -> impl Iterator<Item = &Arc<AgentDefinition>> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Report delegation targets and tools that name nothing registered.
    ///
    /// Problems are logged, not rejected: agents may be wired up in any order.
    pub fn validate_references(&self, tools: &ToolRegistry) -> Vec<String> {
        let mut problems = Vec::new();
        for agent in &self.agents {
            for target in agent.delegation_targets() {
                if !self.contains(target) {
                    problems.push(format!(
                        "agent '{}' delegates to unknown agent '{}'",
                        agent.name(),
                        target
                    ));
                }
            }
            for tool in agent.tool_names() {
                if !tools.has_tool(tool) {
                    problems.push(format!(
                        "agent '{}' permits unknown tool '{}'",
                        agent.name(),
                        tool
                    ));
                }
            }
        }
        for problem in &problems {
            tracing::warn!("{}", problem);
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry
            .register(AgentDefinition::new("writer", "Writes prose").with_capabilities(["writing"]))
            .unwrap();
        registry
            .register(
                AgentDefinition::new("editor", "Edits prose")
                    .with_capabilities(["writing", "review"])
                    .with_delegation_targets(["writer", "ghost"])
                    .with_tools(["spellcheck"]),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = registry();
        assert_eq!(registry.get("writer").unwrap().name(), "writer");
        assert_eq!(
            registry.get("nobody"),
            Err(RegistryError::NotFound("nobody".to_string()))
        );
        assert_eq!(
            registry.register(AgentDefinition::new("writer", "again")),
            Err(RegistryError::DuplicateName("writer".to_string()))
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_find_by_capability_in_registration_order() {
        let registry = registry();
        let names: Vec<&str> = registry
            .find_by_capability("writing")
            .iter()
            .map(|a| a.name())
            .collect();
        assert_eq!(names, vec!["writer", "editor"]);
        assert!(registry.find_by_capability("cooking").is_empty());
    }

    #[test]
    fn test_validate_references() {
        let registry = registry();
        let problems = registry.validate_references(&ToolRegistry::new());
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("ghost")));
        assert!(problems.iter().any(|p| p.contains("spellcheck")));
    }
}
