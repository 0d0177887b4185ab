// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # logic-fabricator
//!
//! A symbolic reasoning engine: unification over wildcard/variable patterns,
//! a fixed-point forward-chaining inference loop, and contradiction-driven
//! forking across a tree of belief systems.
//!
//! ## Architecture
//!
//! - **Model** (`model`): terms, statements, conditions, effects, rules, and
//!   content-addressed identity.
//! - **Unification** (`unify`): pattern matching a `LEAF` condition against a
//!   ground statement, with greedy trailing wildcards.
//! - **Evaluation** (`eval`): the recursive condition evaluator (AND/OR/
//!   EXISTS/FORALL/NONE/COUNT).
//! - **Inference** (`infer`): the fixed-point loop, the causal memo, and
//!   effect application.
//! - **IR translation** (`ir`): lowering the external JSON tree into rules
//!   and statements, including disjunction elimination.
//! - **Contradiction handling** (`contradiction`): proactive rule-level
//!   tension detection and the four fork strategies.
//! - **Belief systems** (`belief`): the façade tying the above into a
//!   lineage tree of fact bases, each with its own world state and memo.
//! - **Persistence** (`persistence`): the `DatabaseAdapter` contract, an
//!   in-memory `petgraph` implementation, and an optional `redb`-durable one.
//!
//! ## Library usage
//!
//! ```
//! use logic_fabricator::belief::BeliefSystemHandle;
//! use logic_fabricator::config::EngineConfig;
//! use logic_fabricator::model::{Condition, Consequence, ForkStrategy, Rule, RuleTable, Statement, Term};
//! use std::sync::Arc;
//!
//! let belief_system = BeliefSystemHandle::new_root("root", ForkStrategy::Coexist, Arc::new(RuleTable::new()));
//! belief_system
//!     .add_rule(
//!         Rule::new(
//!             Condition::Leaf {
//!                 verb: "is".into(),
//!                 terms: vec![Term::Var("x".into()), Term::Const("man".into())],
//!                 negated: false,
//!             },
//!             vec![Consequence::Statement(Statement::new(
//!                 "is",
//!                 vec![Term::Var("x".into()), Term::Const("mortal".into())],
//!                 false,
//!             ))],
//!         )
//!         .unwrap(),
//!     );
//! let result = belief_system
//!     .simulate(
//!         vec![Statement::new("is", vec![Term::Const("socrates".into()), Term::Const("man".into())], false)],
//!         &EngineConfig::default(),
//!     )
//!     .unwrap();
//! assert_eq!(result.derived_facts.len(), 1);
//! ```

pub mod belief;
pub mod cli;
pub mod config;
pub mod contradiction;
pub mod error;
pub mod eval;
pub mod infer;
pub mod ir;
pub mod model;
pub mod persistence;
pub mod unify;
