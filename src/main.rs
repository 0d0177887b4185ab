//! fabricator CLI: symbolic belief-system reasoning workbench.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use serde_json::json;

use logic_fabricator::belief::{next_simulation_id, BeliefSystemHandle};
use logic_fabricator::cli::Session;
use logic_fabricator::config::EngineConfig;
use logic_fabricator::error::FabricatorError;
use logic_fabricator::ir::{self, Translated};
use logic_fabricator::model::ForkStrategy;

/// Output rendering for read commands and `simulate`'s summary.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "fabricator", version, about = "Symbolic belief-system reasoning engine")]
struct Cli {
    /// Data directory for the session snapshot and persistence graph
    /// (omit for an ephemeral in-memory session).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Fixed-point iteration budget per `simulate` call.
    #[arg(long, global = true, default_value = "10000")]
    max_iterations: usize,

    /// Context-rule hop limit for proactive tension detection.
    #[arg(long, global = true, default_value = "1")]
    tension_hops: usize,

    /// Rendering for read commands and the `simulate` summary.
    #[arg(long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a rule, given as an IR envelope JSON (`{"input_type":"rule",...}`).
    AddRule {
        /// Inline JSON, or omit to read from stdin.
        #[arg(long)]
        json: Option<String>,
    },

    /// Run a fixed-point simulation over one or more input statements.
    Simulate {
        /// One IR statement envelope JSON per `--statement` flag.
        #[arg(long = "statement")]
        statements: Vec<String>,

        /// Strategy used the first time this session's root belief system
        /// is created (ignored on subsequent invocations against a
        /// persisted session).
        #[arg(long, default_value = "coexist")]
        strategy: String,
    },

    /// Print the current world-state map.
    State,

    /// Print the current fact base.
    Statements,

    /// Print the current rule set.
    Rules,

    /// Print the fork lineage rooted at the session's belief system.
    Forks,

    /// Discard the session's belief system and start a fresh one.
    Reset,
}

fn parse_strategy(raw: &str) -> Result<ForkStrategy> {
    match raw {
        "coexist" => Ok(ForkStrategy::Coexist),
        "prioritize_new" => Ok(ForkStrategy::PrioritizeNew),
        "prioritize_old" => Ok(ForkStrategy::PrioritizeOld),
        "preserve" => Ok(ForkStrategy::Preserve),
        other => Err(miette::miette!(
            "unknown strategy \"{other}\"; expected one of: coexist, prioritize_new, prioritize_old, preserve"
        )),
    }
}

fn read_json_arg(inline: Option<String>) -> Result<serde_json::Value> {
    let raw = match inline {
        Some(s) => s,
        None => std::io::read_to_string(std::io::stdin()).into_diagnostic()?,
    };
    serde_json::from_str(&raw).into_diagnostic()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Retry a persistence-adapter call once before surfacing its error.
///
/// Adapter failures (a transient `redb` transaction conflict, a momentarily
/// locked snapshot file) are the one error class worth a single retry; a
/// validation or model error from the same call would just fail identically
/// the second time, so only `FabricatorError::Persistence` triggers it.
fn with_retry<T>(
    mut op: impl FnMut() -> Result<T, logic_fabricator::error::PersistenceError>,
) -> Result<T, FabricatorError> {
    match op() {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::warn!(error = %first, "persistence operation failed, retrying once");
            op().map_err(FabricatorError::from)
        }
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig {
        data_dir: cli.data_dir.clone(),
        max_fixed_point_iterations: cli.max_iterations,
        tension_context_hops: cli.tension_hops,
        ..Default::default()
    };
    config.validate().into_diagnostic()?;

    let mut session = Session::load(&config).into_diagnostic()?;

    match cli.command {
        Commands::AddRule { json } => {
            let envelope = read_json_arg(json)?;
            match ir::translate(&envelope).into_diagnostic()? {
                Translated::Rules(rules) => {
                    let mut added = 0usize;
                    for rule in rules {
                        if session.handle.add_rule(rule.clone()) {
                            added += 1;
                        }
                        let condition_json = serde_json::to_string(&rule.condition).into_diagnostic()?;
                        let consequences_json =
                            serde_json::to_string(&rule.consequences).into_diagnostic()?;
                        with_retry(|| {
                            session.adapter.add_rule(
                                session.handle.id(),
                                rule.id(),
                                &condition_json,
                                &consequences_json,
                            )
                        })
                        .into_diagnostic()?;
                    }
                    match cli.format {
                        OutputFormat::Table => println!("added {added} rule(s)"),
                        OutputFormat::Json => {
                            println!("{}", json!({ "added": added }));
                        }
                    }
                }
                Translated::Statement(_) => {
                    return Err(miette::miette!(
                        "expected a \"rule\" IR envelope, got a \"statement\" one"
                    ));
                }
            }
            session.save().into_diagnostic()?;
        }

        Commands::Simulate { statements, strategy } => {
            let strategy = parse_strategy(&strategy)?;
            config.default_strategy = strategy;

            let mut inputs = Vec::with_capacity(statements.len());
            for raw in statements {
                let envelope: serde_json::Value = serde_json::from_str(&raw).into_diagnostic()?;
                match ir::translate(&envelope).into_diagnostic()? {
                    Translated::Statement(stmt) => inputs.push(stmt),
                    Translated::Rules(_) => {
                        return Err(miette::miette!(
                            "expected a \"statement\" IR envelope for --statement, got a \"rule\" one"
                        ));
                    }
                }
            }
            let introduced = inputs.clone();

            let result = session.handle.simulate(inputs, &config).into_diagnostic()?;

            match cli.format {
                OutputFormat::Table => {
                    println!("derived {} fact(s):", result.derived_facts.len());
                    for fact in &result.derived_facts {
                        println!("  {} {:?} negated={}", fact.verb, fact.terms, fact.negated);
                    }
                    if !result.effects_applied.is_empty() {
                        println!("applied {} effect(s)", result.effects_applied.len());
                    }
                    if !result.contradictions.is_empty() {
                        println!("{} contradiction(s) encountered", result.contradictions.len());
                        for forked in &result.forked_beliefs {
                            println!("  forked belief system {}", forked.id());
                        }
                    }
                }
                OutputFormat::Json => {
                    let derived: Vec<_> = result
                        .derived_facts
                        .iter()
                        .map(|f| json!({ "verb": f.verb, "terms": format!("{:?}", f.terms), "negated": f.negated }))
                        .collect();
                    let forked: Vec<_> = result
                        .forked_beliefs
                        .iter()
                        .map(|h| h.id().to_string())
                        .collect();
                    println!(
                        "{}",
                        json!({
                            "derived_facts": derived,
                            "effects_applied": result.effects_applied.len(),
                            "contradictions": result.contradictions.len(),
                            "forked_beliefs": forked,
                        })
                    );
                }
            }

            with_retry(|| {
                session.adapter.record_simulation(
                    next_simulation_id(),
                    session.handle.id(),
                    unix_now(),
                    &introduced,
                    &result.applied_rules,
                    &result.derived_facts,
                )
            })
            .into_diagnostic()?;
            session.save().into_diagnostic()?;

            if let Err(violation) = session.handle.assert_invariants() {
                eprintln!("{:?}", miette::Report::new(violation));
                std::process::exit(101);
            }
        }

        Commands::State => match cli.format {
            OutputFormat::Table => {
                for (key, value) in session.handle.world_state() {
                    println!("{key} = {value}");
                }
            }
            OutputFormat::Json => {
                let state: serde_json::Map<String, serde_json::Value> = session
                    .handle
                    .world_state()
                    .into_iter()
                    .map(|(key, value)| (key, json!(value.to_string())))
                    .collect();
                println!("{}", serde_json::Value::Object(state));
            }
        },

        Commands::Statements => match cli.format {
            OutputFormat::Table => {
                for stmt in session.handle.facts() {
                    let sign = if stmt.negated { "not " } else { "" };
                    println!("{sign}{} {:?} [priority {}]", stmt.verb, stmt.terms, stmt.priority);
                }
            }
            OutputFormat::Json => {
                let facts: Vec<_> = session
                    .handle
                    .facts()
                    .iter()
                    .map(|s| {
                        json!({
                            "verb": s.verb,
                            "terms": format!("{:?}", s.terms),
                            "negated": s.negated,
                            "priority": s.priority,
                        })
                    })
                    .collect();
                println!("{}", json!(facts));
            }
        },

        Commands::Rules => match cli.format {
            OutputFormat::Table => {
                for rule in session.handle.rules() {
                    println!("{}", rule.id());
                }
            }
            OutputFormat::Json => {
                let rules: Vec<_> = session.handle.rules().iter().map(|r| r.id().to_string()).collect();
                println!("{}", json!(rules));
            }
        },

        Commands::Forks => match cli.format {
            OutputFormat::Table => print_fork_tree(&session.handle, 0),
            OutputFormat::Json => println!("{}", fork_tree_json(&session.handle)),
        },

        Commands::Reset => {
            session.reset(&config).into_diagnostic()?;
            println!("session reset; new root belief system {}", session.handle.id());
        }
    }

    Ok(())
}

fn print_fork_tree(handle: &BeliefSystemHandle, depth: usize) {
    println!("{}{} ({})", "  ".repeat(depth), handle.id(), handle.name());
    for child in handle.forks() {
        print_fork_tree(&child, depth + 1);
    }
}

fn fork_tree_json(handle: &BeliefSystemHandle) -> serde_json::Value {
    json!({
        "id": handle.id().to_string(),
        "name": handle.name(),
        "forks": handle.forks().iter().map(fork_tree_json).collect::<Vec<_>>(),
    })
}
