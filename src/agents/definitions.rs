//! The authoritative agent roster.
//!
//! A static, version-controlled table of every agent the runtime knows:
//! logical name, category, description, config path and a constructor. The
//! registry, the webhook bootstrap and the init path all read this table;
//! nothing else defines agents. Construction happens only through the
//! registry (`AgentRegistry::get_or_create`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{roster, AgentHandle};
use crate::error::AgentError;

/// Coarse classification used by bulk creation and bootstrap ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCategory {
    Core,
    Supervisor,
    Scraping,
    Qualification,
    Prospection,
    Analytics,
    Utility,
    Intelligence,
}

impl AgentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Supervisor => "supervisor",
            Self::Scraping => "scraping",
            Self::Qualification => "qualification",
            Self::Prospection => "prospection",
            Self::Analytics => "analytics",
            Self::Utility => "utility",
            Self::Intelligence => "intelligence",
        }
    }
}

impl std::fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constructor signature: optional config-path override in, live agent out.
pub type AgentConstructor = fn(Option<String>) -> Result<AgentHandle, AgentError>;

/// Immutable metadata record for one agent.
pub struct AgentDefinition {
    pub name: &'static str,
    pub category: AgentCategory,
    pub description: &'static str,
    pub config_path: &'static str,
    pub constructor: AgentConstructor,
}

// Constructor shims. Each concrete type decides what it needs from the
// process-wide services; the table only carries the function pointer.

fn new_meta(config_path: Option<String>) -> Result<AgentHandle, AgentError> {
    Ok(Arc::new(crate::meta::MetaAgent::new(config_path)?))
}

fn new_admin_interpreter(config_path: Option<String>) -> Result<AgentHandle, AgentError> {
    Ok(Arc::new(crate::admin::AdminInterpreterAgent::new(config_path)?))
}

fn new_response_listener(config_path: Option<String>) -> Result<AgentHandle, AgentError> {
    Ok(Arc::new(crate::listener::ResponseListenerAgent::new(config_path)?))
}

fn new_response_interpreter(config_path: Option<String>) -> Result<AgentHandle, AgentError> {
    Ok(Arc::new(roster::ResponseInterpreterAgent::new(config_path)?))
}

fn new_test(config_path: Option<String>) -> Result<AgentHandle, AgentError> {
    Ok(Arc::new(roster::TestAgent::new(config_path)?))
}

fn new_scraping_supervisor(config_path: Option<String>) -> Result<AgentHandle, AgentError> {
    Ok(Arc::new(roster::SupervisorAgent::new(
        "ScrapingSupervisor",
        &["NicheExplorerAgent", "ScraperAgent", "CleanerAgent"],
        config_path,
    )?))
}

fn new_qualification_supervisor(config_path: Option<String>) -> Result<AgentHandle, AgentError> {
    Ok(Arc::new(roster::SupervisorAgent::new(
        "QualificationSupervisor",
        &["ValidatorAgent", "DuplicateCheckerAgent", "ScoringAgent"],
        config_path,
    )?))
}

fn new_prospection_supervisor(config_path: Option<String>) -> Result<AgentHandle, AgentError> {
    Ok(Arc::new(roster::SupervisorAgent::new(
        "ProspectionSupervisor",
        &["MessagingAgent", "FollowUpAgent"],
        config_path,
    )?))
}

macro_rules! pipeline_ctor {
    ($fn_name:ident, $agent_name:literal) => {
        fn $fn_name(config_path: Option<String>) -> Result<AgentHandle, AgentError> {
            Ok(Arc::new(roster::PipelineAgent::new($agent_name, config_path)?))
        }
    };
}

pipeline_ctor!(new_niche_explorer, "NicheExplorerAgent");
pipeline_ctor!(new_scraper, "ScraperAgent");
pipeline_ctor!(new_cleaner, "CleanerAgent");
pipeline_ctor!(new_scoring, "ScoringAgent");
pipeline_ctor!(new_validator, "ValidatorAgent");
pipeline_ctor!(new_duplicate_checker, "DuplicateCheckerAgent");
pipeline_ctor!(new_messaging, "MessagingAgent");
pipeline_ctor!(new_follow_up, "FollowUpAgent");
pipeline_ctor!(new_pivot_strategy, "PivotStrategyAgent");
pipeline_ctor!(new_niche_classifier, "NicheClassifierAgent");
pipeline_ctor!(new_database_query, "DatabaseQueryAgent");
pipeline_ctor!(new_web_presence_checker, "WebPresenceCheckerAgent");

/// The full roster. Single source of truth for agent names.
pub static AGENT_DEFINITIONS: &[AgentDefinition] = &[
    AgentDefinition {
        name: "AdminInterpreterAgent",
        category: AgentCategory::Core,
        description: "Interface en langage naturel pour l'administrateur",
        config_path: "agents/admin_interpreter/config.json",
        constructor: new_admin_interpreter,
    },
    AgentDefinition {
        name: "MetaAgent",
        category: AgentCategory::Intelligence,
        description: "Intelligence conversationnelle du système",
        config_path: "agents/meta/config.json",
        constructor: new_meta,
    },
    AgentDefinition {
        name: "ScrapingSupervisor",
        category: AgentCategory::Supervisor,
        description: "Supervise le processus de scraping",
        config_path: "agents/scraping_supervisor/config.json",
        constructor: new_scraping_supervisor,
    },
    AgentDefinition {
        name: "QualificationSupervisor",
        category: AgentCategory::Supervisor,
        description: "Supervise le processus de qualification",
        config_path: "agents/qualification_supervisor/config.json",
        constructor: new_qualification_supervisor,
    },
    AgentDefinition {
        name: "ProspectionSupervisor",
        category: AgentCategory::Supervisor,
        description: "Supervise le processus de prospection",
        config_path: "agents/prospection_supervisor/config.json",
        constructor: new_prospection_supervisor,
    },
    AgentDefinition {
        name: "NicheExplorerAgent",
        category: AgentCategory::Scraping,
        description: "Explore et identifie les niches pertinentes",
        config_path: "agents/niche_explorer/config.json",
        constructor: new_niche_explorer,
    },
    AgentDefinition {
        name: "ScraperAgent",
        category: AgentCategory::Scraping,
        description: "Récupère les leads depuis diverses sources",
        config_path: "agents/scraper/config.json",
        constructor: new_scraper,
    },
    AgentDefinition {
        name: "CleanerAgent",
        category: AgentCategory::Scraping,
        description: "Nettoie et formate les données des leads",
        config_path: "agents/cleaner/config.json",
        constructor: new_cleaner,
    },
    AgentDefinition {
        name: "ScoringAgent",
        category: AgentCategory::Qualification,
        description: "Attribue un score aux leads",
        config_path: "agents/scoring/config.json",
        constructor: new_scoring,
    },
    AgentDefinition {
        name: "ValidatorAgent",
        category: AgentCategory::Qualification,
        description: "Valide les données des leads",
        config_path: "agents/validator/config.json",
        constructor: new_validator,
    },
    AgentDefinition {
        name: "DuplicateCheckerAgent",
        category: AgentCategory::Qualification,
        description: "Vérifie les doublons dans la base de données",
        config_path: "agents/duplicate_checker/config.json",
        constructor: new_duplicate_checker,
    },
    AgentDefinition {
        name: "MessagingAgent",
        category: AgentCategory::Prospection,
        description: "Gère l'envoi de messages (email, SMS)",
        config_path: "agents/messaging/config.json",
        constructor: new_messaging,
    },
    AgentDefinition {
        name: "FollowUpAgent",
        category: AgentCategory::Prospection,
        description: "Gère les relances automatiques",
        config_path: "agents/follow_up/config.json",
        constructor: new_follow_up,
    },
    AgentDefinition {
        name: "ResponseInterpreterAgent",
        category: AgentCategory::Prospection,
        description: "Analyse les réponses reçues",
        config_path: "agents/response_interpreter/config.json",
        constructor: new_response_interpreter,
    },
    AgentDefinition {
        name: "ResponseListenerAgent",
        category: AgentCategory::Prospection,
        description: "Écoute les réponses entrantes (webhooks)",
        config_path: "agents/response_listener/config.json",
        constructor: new_response_listener,
    },
    AgentDefinition {
        name: "PivotStrategyAgent",
        category: AgentCategory::Analytics,
        description: "Analyse les performances et suggère des optimisations",
        config_path: "agents/pivot_strategy/config.json",
        constructor: new_pivot_strategy,
    },
    AgentDefinition {
        name: "NicheClassifierAgent",
        category: AgentCategory::Analytics,
        description: "Classifie les niches et personnalise les approches",
        config_path: "agents/niche_classifier/config.json",
        constructor: new_niche_classifier,
    },
    AgentDefinition {
        name: "DatabaseQueryAgent",
        category: AgentCategory::Utility,
        description: "Interroge la base de données en langage naturel",
        config_path: "agents/database_query/config.json",
        constructor: new_database_query,
    },
    AgentDefinition {
        name: "WebPresenceCheckerAgent",
        category: AgentCategory::Utility,
        description: "Vérifie la présence web des leads",
        config_path: "agents/web_presence_checker/config.json",
        constructor: new_web_presence_checker,
    },
    AgentDefinition {
        name: "TestAgent",
        category: AgentCategory::Utility,
        description: "Agent de test pour le développement",
        config_path: "agents/test/config.json",
        constructor: new_test,
    },
];

/// Look up one definition by name.
pub fn definition(name: &str) -> Option<&'static AgentDefinition> {
    AGENT_DEFINITIONS.iter().find(|def| def.name == name)
}

/// All definitions in a category.
pub fn definitions_in(category: AgentCategory) -> Vec<&'static AgentDefinition> {
    AGENT_DEFINITIONS
        .iter()
        .filter(|def| def.category == category)
        .collect()
}

/// Every known agent name, in table order.
pub fn all_agent_names() -> Vec<&'static str> {
    AGENT_DEFINITIONS.iter().map(|def| def.name).collect()
}
