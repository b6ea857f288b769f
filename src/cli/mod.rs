//! Command-line interface.
//!
//! Three commands: `init` (bootstrap the runtime, optionally without the
//! scheduler), `interact` (REPL over the AdminInterpreter and MetaAgent
//! front doors) and `webhook` (start the HTTP ingress). Arguments are
//! parsed by hand; there are few enough of them.

use std::io::Write as _;

use serde_json::{json, Value};

use crate::agents::{is_success, AgentRegistry};
use crate::overseer::Overseer;
use crate::server::{self, AppState};
use crate::system::{self, BootstrapOptions, SystemHandle};
use crate::utilities::logger::{tail_log, RuntimeLogger};

/// Parsed CLI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Initialize the system, optionally without starting the scheduler.
    Init { no_scheduler: bool },
    /// Interactive REPL.
    Interact,
    /// Start the webhook server.
    Webhook {
        host: Option<String>,
        port: Option<u16>,
    },
    /// Show version information.
    Version,
    /// Show usage.
    Help,
}

/// Parse a command from `argv[1..]`.
pub fn parse_command(args: &[String]) -> Option<CliCommand> {
    let mut iter = args.iter();
    let command = iter.next().map(String::as_str)?;
    match command {
        "init" => {
            let no_scheduler = args.iter().any(|a| a == "--no-scheduler");
            Some(CliCommand::Init { no_scheduler })
        }
        "interact" => Some(CliCommand::Interact),
        "webhook" => {
            let mut host = None;
            let mut port = None;
            let mut iter = args[1..].iter();
            while let Some(flag) = iter.next() {
                match flag.as_str() {
                    "--host" => host = iter.next().cloned(),
                    "--port" => port = iter.next().and_then(|p| p.parse().ok()),
                    _ => return None,
                }
            }
            Some(CliCommand::Webhook { host, port })
        }
        "version" | "--version" | "-v" => Some(CliCommand::Version),
        "help" | "--help" | "-h" => Some(CliCommand::Help),
        _ => None,
    }
}

/// Usage text.
pub fn print_help() {
    println!(
        "berinia {}\n\n\
         USAGE:\n    berinia <commande> [options]\n\n\
         COMMANDES:\n    \
         init [--no-scheduler]         Initialise le système\n    \
         interact                      Console interactive\n    \
         webhook [--host H] [--port P] Démarre le serveur webhook\n    \
         version                       Affiche la version",
        crate::VERSION
    );
}

/// `init`: bootstrap everything, report, and leave the scheduler state as
/// requested.
pub async fn run_init(no_scheduler: bool) -> anyhow::Result<()> {
    let handle = system::initialize(BootstrapOptions {
        start_scheduler: !no_scheduler,
    })
    .await?;
    println!(
        "Système initialisé: {} agents, {} tâches planifiées, scheduler {}",
        AgentRegistry::global().live_names().len(),
        handle.scheduler.pending_count(),
        if handle.scheduler.is_running() {
            "actif"
        } else {
            "inactif"
        }
    );
    handle.scheduler.stop().await;
    Ok(())
}

/// `webhook`: bootstrap without the scheduler worker, then serve HTTP.
pub async fn run_webhook(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let handle = system::initialize(BootstrapOptions {
        start_scheduler: false,
    })
    .await?;

    let state = AppState::from_env();
    if state.auth_token.is_none() {
        anyhow::bail!("variable d'environnement TWILIO_AUTH_TOKEN manquante");
    }

    ctrlc::set_handler(|| {
        println!("\nArrêt du serveur webhook BerinIA...");
        std::process::exit(0);
    })?;

    let host = host.unwrap_or_else(|| handle.config.webhook.host.clone());
    let port = port.unwrap_or(handle.config.webhook.port);
    server::serve(state, &host, port).await?;
    Ok(())
}

const BANNER: &str = r#"
====================================================
            BerinIA — Agents Autonomes
====================================================
Entrez vos instructions en langage naturel.
Tapez 'help' pour la liste des commandes, 'exit' pour quitter.
"#;

const HELP_TEXT: &str = r#"
COMMANDES DE BASE
- help          : affiche cette aide
- exit, quit    : quitte la console
- clear         : efface l'écran

COMMANDES SYSTÈME
- status        : état du système et des agents
- logs [n]      : dernières lignes du journal système
- tasks         : tâches planifiées
- performance   : résumé des performances

EXEMPLES
- "Récupère 50 leads dans la niche coaching"
- "Planifie une relance pour la campagne X demain à 10h"
- "Quelle niche a le meilleur taux de conversion ?"
"#;

/// `interact`: the admin REPL.
pub async fn run_interact() -> anyhow::Result<()> {
    let handle = system::initialize(BootstrapOptions {
        start_scheduler: true,
    })
    .await?;

    ctrlc::set_handler(|| {
        println!("\nArrêt du système BerinIA...");
        std::process::exit(0);
    })?;

    println!("{BANNER}");
    loop {
        let line = read_line("BerinIA> ").await?;
        let Some(line) = line else {
            break; // EOF
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !handle_builtin(trimmed, &handle).await? {
            handle_free_text(trimmed).await;
        }
    }
    handle.scheduler.stop().await;
    Ok(())
}

/// Run one built-in command; false means the line is free text.
async fn handle_builtin(command: &str, handle: &SystemHandle) -> anyhow::Result<bool> {
    let lower = command.to_lowercase();
    match lower.as_str() {
        "exit" | "quit" => {
            handle.scheduler.stop().await;
            println!("Arrêt du système BerinIA...");
            std::process::exit(0);
        }
        "help" => {
            println!("{HELP_TEXT}");
            Ok(true)
        }
        "clear" | "cls" => {
            print!("\x1b[2J\x1b[H");
            std::io::stdout().flush()?;
            Ok(true)
        }
        "status" => {
            let state = Overseer::global().system_state();
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(true)
        }
        "tasks" => {
            let tasks = handle.scheduler.list_pending();
            if tasks.is_empty() {
                println!("Aucune tâche planifiée.");
            } else {
                for task in tasks {
                    println!(
                        "- t={} p={} {} / {}{}",
                        task.timestamp,
                        task.priority,
                        task.task_data.target_agent,
                        task.task_data.action,
                        if task.recurring { " (récurrente)" } else { "" }
                    );
                }
            }
            Ok(true)
        }
        "performance" => {
            let result = Overseer::global()
                .execute(
                    "PivotStrategyAgent",
                    json!({"action": "analyze_performance"}),
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(true)
        }
        _ if lower == "logs" || lower.starts_with("logs ") => {
            let lines = lower
                .split_whitespace()
                .nth(1)
                .and_then(|n| n.parse().ok())
                .unwrap_or(20);
            let path = RuntimeLogger::global().system_log_path();
            match tail_log(&path, lines) {
                Ok(entries) => {
                    for entry in entries {
                        println!("{entry}");
                    }
                }
                Err(_) => println!("Journal système vide."),
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Route free text through the AdminInterpreter, then execute or fall back
/// to the MetaAgent conversation.
async fn handle_free_text(message: &str) {
    let overseer = Overseer::global();
    let analysis = overseer
        .execute("AdminInterpreterAgent", json!({"message": message}))
        .await;

    if analysis.get("intent").and_then(Value::as_str) == Some("action") {
        let action = analysis.get("action").cloned().unwrap_or(Value::Null);
        let target = action
            .get("target_agent")
            .and_then(Value::as_str)
            .unwrap_or("MetaAgent")
            .to_string();

        if analysis.get("requires_confirmation").and_then(Value::as_bool) == Some(true) {
            let original = action
                .get("original_target")
                .and_then(Value::as_str)
                .unwrap_or("?");
            println!("L'agent '{original}' n'existe pas; utiliser '{target}' ? [o/N]");
            match read_line("> ").await {
                Ok(Some(answer)) if answer.trim().eq_ignore_ascii_case("o") => {}
                _ => {
                    println!("Commande abandonnée.");
                    return;
                }
            }
        }

        let mut input = serde_json::Map::new();
        if let Some(Value::Object(params)) = action.get("parameters") {
            for (k, v) in params {
                input.insert(k.clone(), v.clone());
            }
        }
        input.insert(
            "action".to_string(),
            action.get("action").cloned().unwrap_or(json!("execute")),
        );
        let result = overseer.execute(&target, Value::Object(input)).await;
        print_result(message, &target, result).await;
    } else {
        // Not an admin command: plain conversation through the MetaAgent.
        let result = overseer
            .execute("MetaAgent", json!({"message": message}))
            .await;
        match result.get("response").and_then(Value::as_str) {
            Some(response) => println!("{response}"),
            None => println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default()),
        }
    }
}

/// Shape a raw agent result for the console, via the MetaAgent.
async fn print_result(original_message: &str, agent_used: &str, result: Value) {
    if !is_success(&result) {
        let formatted = Overseer::global()
            .execute(
                "MetaAgent",
                json!({
                    "action": "handle_error",
                    "error_message": result.get("message").and_then(Value::as_str).unwrap_or(""),
                    "original_question": original_message,
                }),
            )
            .await;
        match formatted.get("response").and_then(Value::as_str) {
            Some(response) => println!("{response}"),
            None => println!("La commande a échoué."),
        }
        return;
    }

    let formatted = Overseer::global()
        .execute(
            "MetaAgent",
            json!({
                "action": "format_response",
                "original_message": original_message,
                "raw_response": result,
                "agent_used": agent_used,
            }),
        )
        .await;
    match formatted.get("response").and_then(Value::as_str) {
        Some(response) => println!("{response}"),
        None => println!("{}", serde_json::to_string_pretty(&formatted).unwrap_or_default()),
    }
}

/// Read one line from stdin without blocking the runtime.
async fn read_line(prompt: &str) -> anyhow::Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let line = tokio::task::spawn_blocking(|| {
        let mut buffer = String::new();
        std::io::stdin()
            .read_line(&mut buffer)
            .map(|read| (read, buffer))
    })
    .await??;
    match line {
        (0, _) => Ok(None),
        (_, buffer) => Ok(Some(buffer)),
    }
}
