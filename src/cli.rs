//! Command dispatch for the `fabricator` binary (§6's CLI surface).
//!
//! A CLI invocation is one process; the belief system it operates on must
//! therefore survive across invocations. Rather than reconstructing a full
//! [`BeliefSystemHandle`] from the persistence adapter's audit graph (which
//! exists to record provenance, not to serve as the working representation),
//! the session's own working state — rules, facts, world state, strategy —
//! is snapshotted to a small JSON file next to the data directory. Every
//! mutating command still writes through to the `DatabaseAdapter` so the
//! graph in §6's schema stays current.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::belief::BeliefSystemHandle;
use crate::config::EngineConfig;
use crate::error::FabricatorResult;
use crate::model::{ForkStrategy, Rule, RuleTable, Statement};
use crate::persistence::{DatabaseAdapter, InMemoryAdapter};

const SESSION_FILE: &str = "session.json";

#[derive(Debug, Serialize, Deserialize)]
struct SessionSnapshot {
    name: String,
    strategy: ForkStrategy,
    rules: Vec<Rule>,
    facts: Vec<Statement>,
    world_state: crate::model::WorldState,
}

impl SessionSnapshot {
    fn from_handle(handle: &BeliefSystemHandle) -> Self {
        Self {
            name: handle.name(),
            strategy: handle.strategy(),
            rules: handle.rules().iter().map(|r| (**r).clone()).collect(),
            facts: handle.facts(),
            world_state: handle.world_state(),
        }
    }
}

/// Resolves a belief-system session against `data_dir`, falling back to a
/// fresh in-memory session when no data directory was configured or no
/// snapshot exists yet.
pub struct Session {
    pub handle: BeliefSystemHandle,
    pub adapter: Arc<dyn DatabaseAdapter>,
    data_dir: Option<PathBuf>,
}

impl Session {
    pub fn load(config: &EngineConfig) -> FabricatorResult<Self> {
        let rule_table = Arc::new(RuleTable::new());
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(InMemoryAdapter::new());

        let handle = match &config.data_dir {
            Some(dir) => match read_snapshot(dir)? {
                Some(snapshot) => restore_handle(snapshot, Arc::clone(&rule_table)),
                None => BeliefSystemHandle::new_root("root", config.default_strategy, rule_table),
            },
            None => BeliefSystemHandle::new_root("root", config.default_strategy, rule_table),
        };

        adapter.create_belief_system(handle.id(), &handle.name(), handle.strategy(), handle.created_at())?;

        Ok(Self {
            handle,
            adapter,
            data_dir: config.data_dir.clone(),
        })
    }

    /// Persist the session's working state, if a data directory is configured.
    pub fn save(&self) -> FabricatorResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        let snapshot = SessionSnapshot::from_handle(&self.handle);
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(std::io::Error::other)?;
        std::fs::write(dir.join(SESSION_FILE), bytes)?;
        Ok(())
    }

    /// Discard the current session's state and start a fresh root belief
    /// system (the `reset` command).
    pub fn reset(&mut self, config: &EngineConfig) -> FabricatorResult<()> {
        if let Some(dir) = &self.data_dir {
            let path = dir.join(SESSION_FILE);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        let rule_table = Arc::new(RuleTable::new());
        self.handle = BeliefSystemHandle::new_root("root", config.default_strategy, rule_table);
        self.adapter.create_belief_system(
            self.handle.id(),
            &self.handle.name(),
            self.handle.strategy(),
            self.handle.created_at(),
        )?;
        Ok(())
    }
}

fn read_snapshot(dir: &Path) -> FabricatorResult<Option<SessionSnapshot>> {
    let path = dir.join(SESSION_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    let snapshot: SessionSnapshot = serde_json::from_slice(&bytes).map_err(std::io::Error::other)?;
    Ok(Some(snapshot))
}

fn restore_handle(snapshot: SessionSnapshot, rule_table: Arc<RuleTable>) -> BeliefSystemHandle {
    let handle = BeliefSystemHandle::new_root(snapshot.name, snapshot.strategy, rule_table);
    for rule in snapshot.rules {
        handle.add_rule(rule);
    }
    handle.restore_facts(snapshot.facts, snapshot.world_state);
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Condition, Consequence, Term};

    #[test]
    fn session_without_data_dir_is_ephemeral_in_memory() {
        let config = EngineConfig::default();
        let session = Session::load(&config).unwrap();
        assert!(session.handle.facts().is_empty());
        session.save().unwrap();
    }

    #[test]
    fn session_round_trips_through_a_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        {
            let mut session = Session::load(&config).unwrap();
            session.handle.add_rule(
                Rule::new(
                    Condition::Leaf {
                        verb: "is".into(),
                        terms: vec![Term::Var("x".into()), Term::Const("man".into())],
                        negated: false,
                    },
                    vec![Consequence::Statement(Statement::new(
                        "is",
                        vec![Term::Var("x".into()), Term::Const("mortal".into())],
                        false,
                    ))],
                )
                .unwrap(),
            );
            session
                .handle
                .simulate(
                    vec![Statement::new(
                        "is",
                        vec![Term::Const("socrates".into()), Term::Const("man".into())],
                        false,
                    )],
                    &config,
                )
                .unwrap();
            session.save().unwrap();
            let _ = &mut session;
        }

        let reloaded = Session::load(&config).unwrap();
        assert_eq!(reloaded.handle.rules().len(), 1);
        assert_eq!(reloaded.handle.facts().len(), 2);
    }

    #[test]
    fn reset_clears_facts_and_rules() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut session = Session::load(&config).unwrap();
        session
            .handle
            .simulate(
                vec![Statement::new("is", vec![Term::Const("sky".into()), Term::Const("blue".into())], false)],
                &config,
            )
            .unwrap();
        session.save().unwrap();
        session.reset(&config).unwrap();
        assert!(session.handle.facts().is_empty());
    }
}
