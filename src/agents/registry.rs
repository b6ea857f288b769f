//! Process-wide agent registry.
//!
//! Maps logical agent names to live instances. Instantiation is lazy and
//! happens only here: the registry resolves a name through the static
//! definition table and calls the definition's constructor while holding
//! the write lock, so concurrent `get_or_create` calls for the same name
//! produce exactly one instance.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::definitions::{self, AgentCategory};
use super::AgentHandle;
use crate::error::AgentError;

static GLOBAL: Lazy<AgentRegistry> = Lazy::new(AgentRegistry::new);

/// Directory of live agents. One per process; tests may build their own.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentHandle>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static AgentRegistry {
        &GLOBAL
    }

    /// Bind an explicit instance (tests and bootstrap overrides).
    pub fn register(&self, name: &str, agent: AgentHandle) {
        self.agents.write().insert(name.to_string(), agent);
        log::info!(target: "registry", "Agent {name} enregistré dans le registre");
    }

    /// Pure lookup.
    pub fn get(&self, name: &str) -> Option<AgentHandle> {
        self.agents.read().get(name).cloned()
    }

    /// Whether an instance is currently live.
    pub fn contains(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    /// A name is known if it is live or present in the definition table.
    pub fn is_known(&self, name: &str) -> bool {
        self.contains(name) || definitions::definition(name).is_some()
    }

    /// Names of all live instances.
    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every name the registry can resolve (live ∪ defined).
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = definitions::all_agent_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        for live in self.agents.read().keys() {
            if !names.iter().any(|n| n == live) {
                names.push(live.clone());
            }
        }
        names
    }

    /// Resolve an instance, creating it from its definition if needed.
    ///
    /// Idempotent under races: the definition's constructor runs under the
    /// write lock, so at most one instance per name is ever created.
    pub fn get_or_create(
        &self,
        name: &str,
        config_path: Option<String>,
    ) -> Result<AgentHandle, AgentError> {
        if let Some(agent) = self.get(name) {
            return Ok(agent);
        }

        let outcome = {
            let mut agents = self.agents.write();
            if let Some(agent) = agents.get(name) {
                Ok(agent.clone())
            } else {
                match definitions::definition(name) {
                    Some(def) => {
                        // The table holds paths relative to the data root.
                        let config_path = config_path.or_else(|| {
                            Some(
                                crate::utilities::paths::data_root()
                                    .join(def.config_path)
                                    .to_string_lossy()
                                    .into_owned(),
                            )
                        });
                        (def.constructor)(config_path).map(|agent| {
                            agents.insert(name.to_string(), agent.clone());
                            agent
                        })
                    }
                    None => Err(AgentError::UnknownAgent {
                        name: name.to_string(),
                    }),
                }
            }
        };

        // Lock released above; log the outcome now.
        match &outcome {
            Ok(_) => log::info!(target: "registry", "Agent {name} créé depuis les définitions"),
            Err(AgentError::UnknownAgent { .. }) => {
                log::warn!(target: "registry", "Agent {name} introuvable dans les définitions")
            }
            Err(e) => {
                log::error!(target: "registry", "Erreur lors de la création de l'agent {name}: {e}")
            }
        }
        outcome
    }

    /// Bulk-create agents, optionally restricted to the given categories.
    /// Individual failures are logged and skipped; the created set is returned.
    pub fn create_all(&self, categories: Option<&[AgentCategory]>) -> Vec<AgentHandle> {
        let mut created = Vec::new();
        for def in definitions::AGENT_DEFINITIONS {
            if let Some(wanted) = categories {
                if !wanted.contains(&def.category) {
                    continue;
                }
            }
            match self.get_or_create(def.name, None) {
                Ok(agent) => created.push(agent),
                Err(e) => {
                    log::error!(target: "registry", "création de {} échouée: {e}", def.name)
                }
            }
        }
        log::info!(target: "registry", "Création de {} agents terminée", created.len());
        created
    }

    /// Purge every instance (tests only).
    pub fn clear(&self) {
        self.agents.write().clear();
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Agent;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct Probe;

    #[async_trait]
    impl Agent for Probe {
        fn name(&self) -> &str {
            "Probe"
        }
        async fn run(&self, _input: Value) -> Result<Value, crate::error::AgentError> {
            Ok(json!({"status": "success"}))
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = AgentRegistry::new();
        registry.register("Probe", Arc::new(Probe));
        assert!(registry.contains("Probe"));
        assert!(registry.get("Probe").is_some());
        assert!(registry.get("Other").is_none());
    }

    #[test]
    fn test_unknown_name_is_an_error() {
        let registry = AgentRegistry::new();
        assert!(matches!(
            registry.get_or_create("NoSuchAgent", None),
            Err(AgentError::UnknownAgent { .. })
        ));
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new();
        let path = dir
            .path()
            .join("test/config.json")
            .to_string_lossy()
            .into_owned();
        let first = registry.get_or_create("TestAgent", Some(path.clone())).unwrap();
        let second = registry.get_or_create("TestAgent", Some(path)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_concurrent_get_or_create_builds_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(AgentRegistry::new());
        let path = dir
            .path()
            .join("test/config.json")
            .to_string_lossy()
            .into_owned();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let path = path.clone();
            handles.push(std::thread::spawn(move || {
                let agent = registry.get_or_create("TestAgent", Some(path)).unwrap();
                Arc::as_ptr(&agent) as *const () as usize
            }));
        }
        let pointers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(pointers.windows(2).all(|w| w[0] == w[1]), "one instance only");
    }

    #[test]
    fn test_create_all_filters_by_category() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("BERINIA_DATA_DIR", dir.path());
        let registry = AgentRegistry::new();
        let created = registry.create_all(Some(&[AgentCategory::Qualification]));
        assert_eq!(created.len(), 3);
        assert!(registry.contains("ScoringAgent"));
        assert!(!registry.contains("ScraperAgent"));
        std::env::remove_var("BERINIA_DATA_DIR");
    }
}
