//! Persistence adapter contract: a `DatabaseAdapter` trait plus two
//! implementations — an in-memory `petgraph` adapter (the default) and an
//! optional `redb`-backed durable adapter (feature `durable`).
//!
//! Every operation is atomic and `Statement`/`Rule` nodes are `MERGE`d by
//! content id, so identical logic shared across belief systems is a single
//! node in the graph.

use std::collections::HashMap;
use std::sync::RwLock;

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::belief::{BeliefSystemId, SimulationId};
use crate::error::PersistenceError;
use crate::model::{ForkStrategy, RuleId, Statement, StatementId};
use crate::unify::Binding;

/// A node in the persistence graph (§6's Graph Schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    BeliefSystem {
        id: BeliefSystemId,
        name: String,
        strategy: ForkStrategy,
        created_at: u64,
    },
    Rule {
        id: RuleId,
        condition_json: String,
        consequences_json: String,
    },
    Statement {
        id: StatementId,
        verb: String,
        terms_json: String,
        negated: bool,
        priority: i32,
    },
    Simulation {
        id: SimulationId,
        timestamp: u64,
    },
}

/// An edge label in the persistence graph. `CONTAINS` is used for both the
/// belief-system-owns-rule and belief-system-owns-simulation relationships
/// (§6 lists a single `CONTAINS` edge kind; the endpoint node types
/// disambiguate which relationship it represents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    Contains,
    ForkedFrom,
    Used,
    Introduced,
    AppliedRule,
    DerivedFact,
}

/// One row of `get_simulation_history`.
#[derive(Debug, Clone)]
pub struct SimulationRecord {
    pub id: SimulationId,
    pub timestamp: u64,
    pub introduced: Vec<Statement>,
    pub applied_rules: Vec<RuleId>,
    pub derived: Vec<Statement>,
}

/// The persistence contract the core calls after every mutating operation
/// (§6). A failure here never invalidates the in-memory `SimulationResult`
/// already returned to the caller; it is surfaced as a `PersistenceError`
/// for the caller to retry.
pub trait DatabaseAdapter: Send + Sync {
    fn create_belief_system(
        &self,
        id: BeliefSystemId,
        name: &str,
        strategy: ForkStrategy,
        created_at: u64,
    ) -> Result<(), PersistenceError>;

    fn fork_belief_system(
        &self,
        parent_id: BeliefSystemId,
        child_id: BeliefSystemId,
        name: &str,
        strategy: ForkStrategy,
        created_at: u64,
    ) -> Result<(), PersistenceError>;

    fn add_rule(
        &self,
        belief_system_id: BeliefSystemId,
        rule_id: RuleId,
        condition_json: &str,
        consequences_json: &str,
    ) -> Result<(), PersistenceError>;

    #[allow(clippy::too_many_arguments)]
    fn record_simulation(
        &self,
        simulation_id: SimulationId,
        belief_system_id: BeliefSystemId,
        timestamp: u64,
        introduced_statements: &[Statement],
        applied_rules: &[(RuleId, Binding)],
        derived_statements: &[Statement],
    ) -> Result<(), PersistenceError>;

    fn get_simulation_history(
        &self,
        belief_system_id: BeliefSystemId,
    ) -> Result<Vec<SimulationRecord>, PersistenceError>;
}

// ---------------------------------------------------------------------------
// In-memory adapter
// ---------------------------------------------------------------------------

struct GraphState {
    graph: DiGraph<Node, EdgeKind>,
    belief_system_nodes: HashMap<BeliefSystemId, NodeIndex>,
    rule_nodes: HashMap<RuleId, NodeIndex>,
    statement_nodes: HashMap<StatementId, NodeIndex>,
    simulation_nodes: HashMap<SimulationId, NodeIndex>,
}

impl GraphState {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            belief_system_nodes: HashMap::new(),
            rule_nodes: HashMap::new(),
            statement_nodes: HashMap::new(),
            simulation_nodes: HashMap::new(),
        }
    }

    /// `MERGE` a statement node by its content id, returning its index.
    fn merge_statement(&mut self, statement: &Statement) -> Result<NodeIndex, PersistenceError> {
        let id = crate::model::ContentId::of(statement).map_err(|e| PersistenceError::Serialization {
            operation: "merge_statement".into(),
            message: e.to_string(),
        })?;
        if let Some(&idx) = self.statement_nodes.get(&id) {
            return Ok(idx);
        }
        let terms_json = serde_json::to_string(&statement.terms).map_err(|e| PersistenceError::Serialization {
            operation: "merge_statement".into(),
            message: e.to_string(),
        })?;
        let idx = self.graph.add_node(Node::Statement {
            id,
            verb: statement.verb.clone(),
            terms_json,
            negated: statement.negated,
            priority: statement.priority,
        });
        self.statement_nodes.insert(id, idx);
        Ok(idx)
    }
}

/// The default persistence adapter: an in-process `petgraph` directed graph
/// guarded by a single `RwLock`. Lost on process exit; swap in
/// [`RedbAdapter`] (feature `durable`) for a durable one.
pub struct InMemoryAdapter {
    state: RwLock<GraphState>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::new()),
        }
    }

    /// A snapshot of every node currently in the graph, for introspection
    /// and tests.
    pub fn node_count(&self) -> usize {
        self.state.read().expect("persistence lock poisoned").graph.node_count()
    }
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseAdapter for InMemoryAdapter {
    fn create_belief_system(
        &self,
        id: BeliefSystemId,
        name: &str,
        strategy: ForkStrategy,
        created_at: u64,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.write().expect("persistence lock poisoned");
        if state.belief_system_nodes.contains_key(&id) {
            return Ok(());
        }
        let idx = state.graph.add_node(Node::BeliefSystem {
            id,
            name: name.to_string(),
            strategy,
            created_at,
        });
        state.belief_system_nodes.insert(id, idx);
        Ok(())
    }

    fn fork_belief_system(
        &self,
        parent_id: BeliefSystemId,
        child_id: BeliefSystemId,
        name: &str,
        strategy: ForkStrategy,
        created_at: u64,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.write().expect("persistence lock poisoned");
        let parent_idx = *state
            .belief_system_nodes
            .get(&parent_id)
            .ok_or_else(|| PersistenceError::NotFound {
                kind: "BeliefSystem".into(),
                id: parent_id.to_string(),
            })?;
        let child_idx = state.graph.add_node(Node::BeliefSystem {
            id: child_id,
            name: name.to_string(),
            strategy,
            created_at,
        });
        state.belief_system_nodes.insert(child_id, child_idx);
        state.graph.add_edge(child_idx, parent_idx, EdgeKind::ForkedFrom);
        Ok(())
    }

    fn add_rule(
        &self,
        belief_system_id: BeliefSystemId,
        rule_id: RuleId,
        condition_json: &str,
        consequences_json: &str,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.write().expect("persistence lock poisoned");
        let bs_idx = *state
            .belief_system_nodes
            .get(&belief_system_id)
            .ok_or_else(|| PersistenceError::NotFound {
                kind: "BeliefSystem".into(),
                id: belief_system_id.to_string(),
            })?;
        let rule_idx = if let Some(&idx) = state.rule_nodes.get(&rule_id) {
            idx
        } else {
            let idx = state.graph.add_node(Node::Rule {
                id: rule_id,
                condition_json: condition_json.to_string(),
                consequences_json: consequences_json.to_string(),
            });
            state.rule_nodes.insert(rule_id, idx);
            idx
        };
        if !state
            .graph
            .edges_connecting(bs_idx, rule_idx)
            .any(|e| *e.weight() == EdgeKind::Contains)
        {
            state.graph.add_edge(bs_idx, rule_idx, EdgeKind::Contains);
        }
        Ok(())
    }

    fn record_simulation(
        &self,
        simulation_id: SimulationId,
        belief_system_id: BeliefSystemId,
        timestamp: u64,
        introduced_statements: &[Statement],
        applied_rules: &[(RuleId, Binding)],
        derived_statements: &[Statement],
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.write().expect("persistence lock poisoned");
        let bs_idx = *state
            .belief_system_nodes
            .get(&belief_system_id)
            .ok_or_else(|| PersistenceError::NotFound {
                kind: "BeliefSystem".into(),
                id: belief_system_id.to_string(),
            })?;

        let sim_idx = state.graph.add_node(Node::Simulation {
            id: simulation_id,
            timestamp,
        });
        state.simulation_nodes.insert(simulation_id, sim_idx);
        state.graph.add_edge(bs_idx, sim_idx, EdgeKind::Used);

        for stmt in introduced_statements {
            let stmt_idx = state.merge_statement(stmt)?;
            state.graph.add_edge(sim_idx, stmt_idx, EdgeKind::Introduced);
        }

        for (rule_id, _binding) in applied_rules {
            if let Some(&rule_idx) = state.rule_nodes.get(rule_id) {
                state.graph.add_edge(sim_idx, rule_idx, EdgeKind::AppliedRule);
            }
        }

        for stmt in derived_statements {
            let stmt_idx = state.merge_statement(stmt)?;
            state.graph.add_edge(sim_idx, stmt_idx, EdgeKind::DerivedFact);
        }

        Ok(())
    }

    fn get_simulation_history(
        &self,
        belief_system_id: BeliefSystemId,
    ) -> Result<Vec<SimulationRecord>, PersistenceError> {
        let state = self.state.read().expect("persistence lock poisoned");
        let bs_idx = *state
            .belief_system_nodes
            .get(&belief_system_id)
            .ok_or_else(|| PersistenceError::NotFound {
                kind: "BeliefSystem".into(),
                id: belief_system_id.to_string(),
            })?;

        let mut records = Vec::new();
        for neighbor in state.graph.neighbors(bs_idx) {
            let Some(Node::Simulation { id, timestamp }) = state.graph.node_weight(neighbor) else {
                continue;
            };
            let mut introduced = Vec::new();
            let mut derived = Vec::new();
            let mut applied_rules = Vec::new();
            for edge in state.graph.edges(neighbor) {
                match (edge.weight(), state.graph.node_weight(edge.target())) {
                    (EdgeKind::Introduced, Some(Node::Statement { verb, terms_json, negated, priority, .. })) => {
                        introduced.push(statement_from_node(verb, terms_json, *negated, *priority)?);
                    }
                    (EdgeKind::DerivedFact, Some(Node::Statement { verb, terms_json, negated, priority, .. })) => {
                        derived.push(statement_from_node(verb, terms_json, *negated, *priority)?);
                    }
                    (EdgeKind::AppliedRule, Some(Node::Rule { id, .. })) => {
                        applied_rules.push(*id);
                    }
                    _ => {}
                }
            }
            records.push(SimulationRecord {
                id: *id,
                timestamp: *timestamp,
                introduced,
                applied_rules,
                derived,
            });
        }
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

fn statement_from_node(
    verb: &str,
    terms_json: &str,
    negated: bool,
    priority: i32,
) -> Result<Statement, PersistenceError> {
    let terms = serde_json::from_str(terms_json).map_err(|e| PersistenceError::Serialization {
        operation: "get_simulation_history".into(),
        message: e.to_string(),
    })?;
    Ok(Statement {
        verb: verb.to_string(),
        terms,
        negated,
        priority,
    })
}

// ---------------------------------------------------------------------------
// Durable adapter (feature `durable`)
// ---------------------------------------------------------------------------

#[cfg(feature = "durable")]
pub mod durable {
    //! A `redb`-backed adapter. Every mutating call wraps the graph mutation
    //! in a single `begin_write`/`commit` transaction: the in-memory graph is
    //! the working representation, serialized to a single `bincode` blob per
    //! transaction so a crash never leaves a half-written graph on disk.

    use std::path::Path;
    use std::sync::Arc;

    use redb::{Database, TableDefinition};

    use super::*;

    const GRAPH_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("persistence_graph");
    const GRAPH_KEY: &[u8] = b"graph";

    /// Durable wrapper around [`InMemoryAdapter`]: the graph lives in memory
    /// during the process and is persisted to `redb` after every mutation.
    pub struct RedbAdapter {
        db: Arc<Database>,
        memory: InMemoryAdapter,
    }

    impl RedbAdapter {
        pub fn open(data_dir: &Path) -> Result<Self, PersistenceError> {
            std::fs::create_dir_all(data_dir).map_err(|e| PersistenceError::AdapterFailed {
                operation: "open".into(),
                message: e.to_string(),
            })?;
            let db_path = data_dir.join("logic-fabricator.redb");
            let db = Database::create(&db_path).map_err(|e| PersistenceError::Redb {
                operation: "open".into(),
                message: e.to_string(),
            })?;
            let adapter = Self {
                db: Arc::new(db),
                memory: InMemoryAdapter::new(),
            };
            adapter.load()?;
            Ok(adapter)
        }

        fn load(&self) -> Result<(), PersistenceError> {
            let txn = self.db.begin_read().map_err(|e| PersistenceError::Redb {
                operation: "begin_read".into(),
                message: e.to_string(),
            })?;
            let table = match txn.open_table(GRAPH_TABLE) {
                Ok(t) => t,
                Err(_) => return Ok(()),
            };
            let Some(bytes) = table
                .get(GRAPH_KEY)
                .map_err(|e| PersistenceError::Redb {
                    operation: "get".into(),
                    message: e.to_string(),
                })?
            else {
                return Ok(());
            };
            let snapshot: PersistedGraph =
                bincode::deserialize(&bytes.value()).map_err(|e| PersistenceError::Serialization {
                    operation: "load".into(),
                    message: e.to_string(),
                })?;
            self.memory.restore(snapshot);
            Ok(())
        }

        fn persist(&self) -> Result<(), PersistenceError> {
            let snapshot = self.memory.snapshot();
            let bytes = bincode::serialize(&snapshot).map_err(|e| PersistenceError::Serialization {
                operation: "persist".into(),
                message: e.to_string(),
            })?;
            let txn = self.db.begin_write().map_err(|e| PersistenceError::Redb {
                operation: "begin_write".into(),
                message: e.to_string(),
            })?;
            {
                let mut table = txn.open_table(GRAPH_TABLE).map_err(|e| PersistenceError::Redb {
                    operation: "open_table".into(),
                    message: e.to_string(),
                })?;
                table
                    .insert(GRAPH_KEY, bytes.as_slice())
                    .map_err(|e| PersistenceError::Redb {
                        operation: "insert".into(),
                        message: e.to_string(),
                    })?;
            }
            txn.commit().map_err(|e| PersistenceError::Redb {
                operation: "commit".into(),
                message: e.to_string(),
            })?;
            Ok(())
        }
    }

    impl DatabaseAdapter for RedbAdapter {
        fn create_belief_system(
            &self,
            id: BeliefSystemId,
            name: &str,
            strategy: ForkStrategy,
            created_at: u64,
        ) -> Result<(), PersistenceError> {
            self.memory.create_belief_system(id, name, strategy, created_at)?;
            self.persist()
        }

        fn fork_belief_system(
            &self,
            parent_id: BeliefSystemId,
            child_id: BeliefSystemId,
            name: &str,
            strategy: ForkStrategy,
            created_at: u64,
        ) -> Result<(), PersistenceError> {
            self.memory
                .fork_belief_system(parent_id, child_id, name, strategy, created_at)?;
            self.persist()
        }

        fn add_rule(
            &self,
            belief_system_id: BeliefSystemId,
            rule_id: RuleId,
            condition_json: &str,
            consequences_json: &str,
        ) -> Result<(), PersistenceError> {
            self.memory
                .add_rule(belief_system_id, rule_id, condition_json, consequences_json)?;
            self.persist()
        }

        fn record_simulation(
            &self,
            simulation_id: SimulationId,
            belief_system_id: BeliefSystemId,
            timestamp: u64,
            introduced_statements: &[Statement],
            applied_rules: &[(RuleId, Binding)],
            derived_statements: &[Statement],
        ) -> Result<(), PersistenceError> {
            self.memory.record_simulation(
                simulation_id,
                belief_system_id,
                timestamp,
                introduced_statements,
                applied_rules,
                derived_statements,
            )?;
            self.persist()
        }

        fn get_simulation_history(
            &self,
            belief_system_id: BeliefSystemId,
        ) -> Result<Vec<SimulationRecord>, PersistenceError> {
            self.memory.get_simulation_history(belief_system_id)
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct PersistedGraph {
        nodes: Vec<Node>,
        edges: Vec<(usize, usize, EdgeKind)>,
    }

    impl InMemoryAdapter {
        fn snapshot(&self) -> PersistedGraph {
            let state = self.state.read().expect("persistence lock poisoned");
            let nodes = state.graph.node_weights().cloned().collect();
            let edges = state
                .graph
                .edge_indices()
                .filter_map(|e| {
                    let (a, b) = state.graph.edge_endpoints(e)?;
                    Some((a.index(), b.index(), *state.graph.edge_weight(e)?))
                })
                .collect();
            PersistedGraph { nodes, edges }
        }

        fn restore(&self, snapshot: PersistedGraph) {
            let mut state = self.state.write().expect("persistence lock poisoned");
            *state = GraphState::new();
            let mut indices = Vec::with_capacity(snapshot.nodes.len());
            for node in snapshot.nodes {
                let idx = state.graph.add_node(node.clone());
                match &node {
                    Node::BeliefSystem { id, .. } => {
                        state.belief_system_nodes.insert(*id, idx);
                    }
                    Node::Rule { id, .. } => {
                        state.rule_nodes.insert(*id, idx);
                    }
                    Node::Statement { id, .. } => {
                        state.statement_nodes.insert(*id, idx);
                    }
                    Node::Simulation { id, .. } => {
                        state.simulation_nodes.insert(*id, idx);
                    }
                }
                indices.push(idx);
            }
            for (a, b, kind) in snapshot.edges {
                state.graph.add_edge(indices[a], indices[b], kind);
            }
        }
    }
}

#[cfg(feature = "durable")]
pub use durable::RedbAdapter;
