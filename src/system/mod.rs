//! Ordered system initialization.
//!
//! Bootstrap sequence: working directories → logger → system config →
//! environment validation (fatal on a missing LLM key) → knowledge store →
//! agent registry → overseer defaults → scheduler, including the seeding of
//! recurring tasks declared in the system config.

use std::path::Path;
use std::sync::Arc;

use crate::agents::AgentRegistry;
use crate::error::AgentError;
use crate::knowledge::{self, KnowledgeStore, DEFAULT_VECTOR_SIZE};
use crate::llm::LLMService;
use crate::overseer::Overseer;
use crate::scheduler::{now_epoch, Scheduler, TaskData};
use crate::utilities::config::SystemConfig;
use crate::utilities::logger::{LoggerConfig, RuntimeLogger};
use crate::utilities::paths;

/// Bootstrap switches.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Start the scheduler worker after seeding.
    pub start_scheduler: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            start_scheduler: true,
        }
    }
}

/// Handles to the initialized runtime.
pub struct SystemHandle {
    pub config: Arc<SystemConfig>,
    pub scheduler: Arc<Scheduler>,
    pub knowledge: Arc<dyn KnowledgeStore>,
}

/// Initialize the whole runtime in order. Configuration problems are fatal
/// here; downstream services only degrade.
pub async fn initialize(options: BootstrapOptions) -> Result<SystemHandle, AgentError> {
    let root = paths::data_root();
    ensure_directories(&root)?;

    RuntimeLogger::init(LoggerConfig::default());
    log::info!(target: "bootstrap", "initialisation de BerinIA v{}", crate::VERSION);

    let config = Arc::new(SystemConfig::load(&root.join("config.json"))?);

    check_environment(&LLMService::global())?;

    let knowledge = knowledge::global_store();
    if let Err(e) = knowledge.create_collection("knowledge", DEFAULT_VECTOR_SIZE).await {
        // Vector store unreachable: retrieval degrades, boot continues.
        log::warn!(target: "bootstrap", "collection 'knowledge' indisponible: {e}");
    }

    let created = AgentRegistry::global().create_all(None);
    log::info!(target: "bootstrap", "{} agents initialisés", created.len());

    Overseer::global().set_default_timeout(config.default_timeout_s);

    let scheduler = Arc::new(Scheduler::new(
        root.join(&config.scheduler.tasks_file),
        config.scheduler.check_interval_seconds,
    )?);
    seed_recurring_tasks(&scheduler, &config);
    if options.start_scheduler {
        scheduler.start(Overseer::global());
        log::info!(target: "bootstrap", "scheduler démarré");
    }

    log::info!(target: "bootstrap", "initialisation terminée");
    Ok(SystemHandle {
        config,
        scheduler,
        knowledge,
    })
}

/// Create the runtime directory layout under `root`.
pub fn ensure_directories(root: &Path) -> Result<(), AgentError> {
    for dir in ["logs", "data", "data/knowledge", "agents"] {
        std::fs::create_dir_all(root.join(dir))?;
    }
    Ok(())
}

/// A missing LLM key is a configuration error, fatal at bootstrap.
pub fn check_environment(llm: &LLMService) -> Result<(), AgentError> {
    if !llm.is_configured() {
        return Err(AgentError::config(
            "variable d'environnement OPENAI_API_KEY manquante",
        ));
    }
    Ok(())
}

/// Seed the recurring tasks declared in the system config. Tasks whose id is
/// already queued keep their cadence; they are not rescheduled.
pub fn seed_recurring_tasks(scheduler: &Scheduler, config: &SystemConfig) {
    let queued: Vec<String> = scheduler
        .list_pending()
        .into_iter()
        .map(|t| t.task_id)
        .collect();
    for spec in &config.recurring_tasks {
        if queued.iter().any(|id| id == &spec.task_id) {
            continue;
        }
        let result = scheduler.schedule(
            TaskData {
                target_agent: spec.target_agent.clone(),
                action: spec.action.clone(),
                parameters: spec.parameters.clone(),
            },
            now_epoch() + spec.initial_delay_s.max(1),
            crate::scheduler::DEFAULT_PRIORITY,
            Some(spec.task_id.clone()),
            true,
            Some(spec.interval_s),
        );
        match result {
            Ok(_) => log::info!(
                target: "bootstrap",
                "tâche récurrente {} semée (intervalle {}s)",
                spec.task_id,
                spec.interval_s
            ),
            Err(e) => log::error!(
                target: "bootstrap",
                "semis de la tâche {} impossible: {e}",
                spec.task_id
            ),
        }
    }
}
