//! Belief system façade (§3, §4.6, §9): holds a rule set, a fact base, a
//! world state, a causal memo, and a lineage of forks; exposes `simulate`.
//!
//! Conditions and fork lineages form trees, not graphs (§9's design note). A
//! [`BeliefSystemHandle`] wraps the single `Arc<RwLock<BeliefSystem>>` a tree
//! node owns; a node's `parent` and its `forks` list hold only [`Weak`]
//! references to their neighbors, so the strong ownership edge always points
//! from a handle held by the caller (or by the parent's own creation of the
//! child) down to the node itself — nothing here is reference-counted in a
//! cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::contradiction;
use crate::config::EngineConfig;
use crate::error::{EngineInvariantError, FabricatorError, ValidationError};
use crate::infer::{self, CausalMemo, FixedPointOutcome};
use crate::model::{ForkStrategy, Rule, RuleId, RuleTable, Statement, WorldState};
use crate::unify::Binding;

/// Unique identifier for a belief system node in the lineage tree.
///
/// Backed by a `NonZeroU64` so `Option<BeliefSystemId>` costs nothing extra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BeliefSystemId(std::num::NonZeroU64);

impl std::fmt::Display for BeliefSystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bs:{}", self.0)
    }
}

static NEXT_BELIEF_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

fn next_belief_system_id() -> BeliefSystemId {
    let raw = NEXT_BELIEF_SYSTEM_ID.fetch_add(1, Ordering::Relaxed);
    BeliefSystemId(std::num::NonZeroU64::new(raw).expect("counter starts at 1 and only grows"))
}

/// Unique identifier for one `simulate` call, used by the persistence
/// adapter's `Simulation` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SimulationId(std::num::NonZeroU64);

impl std::fmt::Display for SimulationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sim:{}", self.0)
    }
}

static NEXT_SIMULATION_ID: AtomicU64 = AtomicU64::new(1);

/// Mint a fresh `SimulationId`, for callers (the CLI, the persistence layer)
/// recording a `Simulation` node that did not originate from inside
/// `simulate` itself.
pub fn next_simulation_id() -> SimulationId {
    let raw = NEXT_SIMULATION_ID.fetch_add(1, Ordering::Relaxed);
    SimulationId(std::num::NonZeroU64::new(raw).expect("counter starts at 1 and only grows"))
}

/// A statement-level contradiction: `existing` and `incoming` are
/// content-equal with opposite `negated` flags, and `strategy` is what the
/// belief system used to resolve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub existing: Statement,
    pub incoming: Statement,
    pub strategy: ForkStrategy,
}

/// One entry in a belief system's fork list: the contradiction that produced
/// the fork (`None` for an explicit manual `fork()` call) and a weak handle
/// to the child.
pub struct ForkRecord {
    pub contradiction: Option<Contradiction>,
    child: Weak<RwLock<BeliefSystem>>,
}

impl ForkRecord {
    /// Upgrade to a live handle, if the child is still reachable.
    pub fn child(&self) -> Option<BeliefSystemHandle> {
        self.child.upgrade().map(BeliefSystemHandle)
    }
}

/// Everything produced by one `simulate` call (§4.6).
#[derive(Debug, Clone, Default)]
pub struct SimulationResult {
    pub derived_facts: Vec<Statement>,
    pub applied_rules: Vec<(RuleId, Binding)>,
    pub effects_applied: Vec<crate::model::Effect>,
    pub world_state_before: WorldState,
    pub world_state_after: WorldState,
    pub contradictions: Vec<Contradiction>,
    pub forked_beliefs: Vec<BeliefSystemHandle>,
}

/// The belief system's internal, lock-guarded state. Never exposed
/// directly; always reached through a [`BeliefSystemHandle`].
struct BeliefSystem {
    id: BeliefSystemId,
    name: String,
    strategy: ForkStrategy,
    created_at: u64,
    rule_table: Arc<RuleTable>,
    rule_ids: Vec<RuleId>,
    facts: Vec<Statement>,
    world_state: WorldState,
    memo: CausalMemo,
    parent: Option<Weak<RwLock<BeliefSystem>>>,
    forks: Vec<ForkRecord>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A cloneable handle to one node in a belief-system lineage tree.
///
/// Cloning a handle is cheap (an `Arc` bump); every clone refers to the same
/// underlying node. This is the only public way to reach a [`BeliefSystem`].
#[derive(Clone)]
pub struct BeliefSystemHandle(Arc<RwLock<BeliefSystem>>);

impl BeliefSystemHandle {
    /// Create a fresh root belief system, owning no rules or facts yet.
    pub fn new_root(
        name: impl Into<String>,
        strategy: ForkStrategy,
        rule_table: Arc<RuleTable>,
    ) -> Self {
        let inner = BeliefSystem {
            id: next_belief_system_id(),
            name: name.into(),
            strategy,
            created_at: unix_now(),
            rule_table,
            rule_ids: Vec::new(),
            facts: Vec::new(),
            world_state: WorldState::new(),
            memo: CausalMemo::new(),
            parent: None,
            forks: Vec::new(),
        };
        Self(Arc::new(RwLock::new(inner)))
    }

    pub fn id(&self) -> BeliefSystemId {
        self.0.read().expect("belief system lock poisoned").id
    }

    pub fn name(&self) -> String {
        self.0.read().expect("belief system lock poisoned").name.clone()
    }

    pub fn strategy(&self) -> ForkStrategy {
        self.0.read().expect("belief system lock poisoned").strategy
    }

    pub fn created_at(&self) -> u64 {
        self.0.read().expect("belief system lock poisoned").created_at
    }

    /// The rules this belief system currently holds, in `add_rule` order.
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        let guard = self.0.read().expect("belief system lock poisoned");
        guard
            .rule_ids
            .iter()
            .filter_map(|id| guard.rule_table.get(*id))
            .collect()
    }

    pub fn facts(&self) -> Vec<Statement> {
        self.0.read().expect("belief system lock poisoned").facts.clone()
    }

    pub fn world_state(&self) -> WorldState {
        self.0
            .read()
            .expect("belief system lock poisoned")
            .world_state
            .clone()
    }

    pub fn parent(&self) -> Option<BeliefSystemHandle> {
        self.0
            .read()
            .expect("belief system lock poisoned")
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(BeliefSystemHandle)
    }

    /// Live child forks (a weak reference whose belief system has since been
    /// dropped by every other handle is simply omitted).
    pub fn forks(&self) -> Vec<BeliefSystemHandle> {
        self.0
            .read()
            .expect("belief system lock poisoned")
            .forks
            .iter()
            .filter_map(ForkRecord::child)
            .collect()
    }

    /// Fork annotations (contradiction + strategy) paired with the live
    /// child, for introspection callers that want the full record.
    pub fn fork_annotations(&self) -> Vec<(Option<Contradiction>, BeliefSystemHandle)> {
        self.0
            .read()
            .expect("belief system lock poisoned")
            .forks
            .iter()
            .filter_map(|record| record.child().map(|child| (record.contradiction.clone(), child)))
            .collect()
    }

    /// Append a rule; reject if content-equal to an existing rule in this
    /// belief system (§4.6). Returns `false` without mutating state if the
    /// rule was already present.
    pub fn add_rule(&self, rule: Rule) -> bool {
        let mut guard = self.0.write().expect("belief system lock poisoned");
        let id = guard.rule_table.intern(rule);
        if guard.rule_ids.contains(&id) {
            false
        } else {
            guard.rule_ids.push(id);
            true
        }
    }

    /// Seed this belief system's fact base and world state directly, bypassing
    /// contradiction checking. Used only to restore a session snapshot that
    /// is already known to be internally consistent (it was saved from a
    /// belief system that enforced the invariants itself).
    pub fn restore_facts(&self, facts: Vec<Statement>, world_state: WorldState) {
        let mut guard = self.0.write().expect("belief system lock poisoned");
        guard.facts = facts;
        guard.world_state = world_state;
    }

    /// Explicit manual fork (§4.6): a child inheriting everything, optionally
    /// overriding the strategy tag, with no contradiction attached.
    pub fn fork(&self, strategy: Option<ForkStrategy>) -> BeliefSystemHandle {
        let mut guard = self.0.write().expect("belief system lock poisoned");
        let child_strategy = strategy.unwrap_or(guard.strategy);
        let child = Arc::new(RwLock::new(BeliefSystem {
            id: next_belief_system_id(),
            name: format!("{}-fork", guard.name),
            strategy: child_strategy,
            created_at: unix_now(),
            rule_table: Arc::clone(&guard.rule_table),
            rule_ids: guard.rule_ids.clone(),
            facts: guard.facts.clone(),
            world_state: guard.world_state.clone(),
            memo: guard.memo.clone(),
            parent: Some(Arc::downgrade(&self.0)),
            forks: Vec::new(),
        }));
        guard.forks.push(ForkRecord {
            contradiction: None,
            child: Arc::downgrade(&child),
        });
        BeliefSystemHandle(child)
    }

    fn spawn_fork(&self, child_facts: Vec<Statement>, contradiction: Contradiction) -> BeliefSystemHandle {
        let mut guard = self.0.write().expect("belief system lock poisoned");
        let child = Arc::new(RwLock::new(BeliefSystem {
            id: next_belief_system_id(),
            name: format!("{}-fork", guard.name),
            strategy: guard.strategy,
            created_at: unix_now(),
            rule_table: Arc::clone(&guard.rule_table),
            rule_ids: guard.rule_ids.clone(),
            facts: child_facts,
            world_state: guard.world_state.clone(),
            memo: guard.memo.clone(),
            parent: Some(Arc::downgrade(&self.0)),
            forks: Vec::new(),
        }));
        guard.forks.push(ForkRecord {
            contradiction: Some(contradiction),
            child: Arc::downgrade(&child),
        });
        BeliefSystemHandle(child)
    }

    /// Check §3's invariants against the current snapshot. A violation is a
    /// fatal programming error (§7): callers in debug builds and the CLI's
    /// top-level handler abort the process rather than continue.
    pub fn assert_invariants(&self) -> Result<(), EngineInvariantError> {
        let guard = self.0.read().expect("belief system lock poisoned");
        for fact in &guard.facts {
            if !fact.is_ground() {
                return Err(EngineInvariantError::NonGroundFact {
                    statement_json: serde_json::to_string(fact).unwrap_or_default(),
                });
            }
        }
        for i in 0..guard.facts.len() {
            for j in (i + 1)..guard.facts.len() {
                if guard.facts[i].content_equal(&guard.facts[j]) {
                    return Err(EngineInvariantError::DuplicateStatement {
                        statement_json: serde_json::to_string(&guard.facts[i]).unwrap_or_default(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run `inputs` through the fixed-point loop (§4.3), handling any
    /// contradiction via the fork engine (§4.5).
    pub fn simulate(
        &self,
        inputs: Vec<Statement>,
        config: &EngineConfig,
    ) -> Result<SimulationResult, FabricatorError> {
        for stmt in &inputs {
            if !stmt.is_ground() {
                return Err(ValidationError::NonGroundInput {
                    statement_json: serde_json::to_string(stmt).unwrap_or_default(),
                }
                .into());
            }
        }

        let (original_facts, original_world, original_memo, strategy, rules) = {
            let guard = self.0.read().expect("belief system lock poisoned");
            let rules: Vec<Arc<Rule>> = guard
                .rule_ids
                .iter()
                .filter_map(|id| guard.rule_table.get(*id))
                .collect();
            (
                guard.facts.clone(),
                guard.world_state.clone(),
                guard.memo.clone(),
                guard.strategy,
                rules,
            )
        };

        let mut result = SimulationResult {
            world_state_before: original_world.clone(),
            world_state_after: original_world.clone(),
            ..Default::default()
        };

        // Phase 1: admit the frontier, checking each input for a direct
        // contradiction before it joins the working fact set (§4.3 step 1).
        let mut working_facts = original_facts.clone();
        for (idx, stmt) in inputs.iter().enumerate() {
            if working_facts.iter().any(|f| f.content_equal(stmt)) {
                continue;
            }
            if let Some(existing) = working_facts.iter().find(|f| f.contradicts(stmt)).cloned() {
                return self.handle_contradiction(
                    strategy,
                    &working_facts,
                    existing,
                    stmt.clone(),
                    &inputs[idx + 1..],
                    result,
                    config,
                );
            }
            working_facts.push(stmt.clone());
        }

        // Phase 2: the fixed-point loop (§4.3 step 2), run against a local
        // snapshot so a mid-loop contradiction never partially commits.
        let mut facts = working_facts;
        let mut world_state = original_world;
        let mut memo = original_memo;
        match infer::run_fixed_point(
            &rules,
            &mut facts,
            &mut world_state,
            &mut memo,
            config.max_fixed_point_iterations,
        )? {
            FixedPointOutcome::Quiescent(report) => {
                {
                    let mut guard = self.0.write().expect("belief system lock poisoned");
                    guard.facts = facts;
                    guard.world_state = world_state.clone();
                    guard.memo = memo;
                }
                result.derived_facts = report.derived_facts;
                result.applied_rules = report.applied_rules;
                result.effects_applied = report.effects_applied;
                result.world_state_after = world_state;
                Ok(result)
            }
            FixedPointOutcome::Contradiction {
                existing, incoming, ..
            } => self.handle_contradiction(strategy, &facts, existing, incoming, &[], result, config),
        }
    }

    fn handle_contradiction(
        &self,
        strategy: ForkStrategy,
        facts_at_point: &[Statement],
        existing: Statement,
        incoming: Statement,
        remaining_inputs: &[Statement],
        mut result: SimulationResult,
        config: &EngineConfig,
    ) -> Result<SimulationResult, FabricatorError> {
        let contradiction = Contradiction {
            existing: existing.clone(),
            incoming: incoming.clone(),
            strategy,
        };
        result.contradictions.push(contradiction.clone());

        match contradiction::resolve_fork(strategy, facts_at_point, &existing, &incoming) {
            None => {
                // `preserve`: no fork, parent strictly unchanged (§8 property 5).
                Ok(result)
            }
            Some(child_facts) => {
                let child = self.spawn_fork(child_facts, contradiction);
                let continuation = child.simulate(remaining_inputs.to_vec(), config)?;
                result.derived_facts.extend(continuation.derived_facts);
                result.applied_rules.extend(continuation.applied_rules);
                result.effects_applied.extend(continuation.effects_applied);
                result.contradictions.extend(continuation.contradictions);
                result.forked_beliefs.push(child);
                result.forked_beliefs.extend(continuation.forked_beliefs);
                Ok(result)
            }
        }
    }
}

impl std::fmt::Debug for BeliefSystemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.0.read().expect("belief system lock poisoned");
        f.debug_struct("BeliefSystemHandle")
            .field("id", &guard.id)
            .field("name", &guard.name)
            .field("strategy", &guard.strategy)
            .field("rules", &guard.rule_ids.len())
            .field("facts", &guard.facts.len())
            .field("forks", &guard.forks.len())
            .finish()
    }
}
