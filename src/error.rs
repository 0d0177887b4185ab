//! Rich diagnostic error types for the Logic Fabricator engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so a caller knows exactly
//! what went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the Logic Fabricator engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum FabricatorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    EngineInvariant(#[from] EngineInvariantError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias for functions returning Logic Fabricator results.
pub type FabricatorResult<T> = std::result::Result<T, FabricatorError>;

// ---------------------------------------------------------------------------
// Validation errors — malformed IR, malformed patterns, non-ground input.
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("unknown condition type: {tag}")]
    #[diagnostic(
        code(fabricator::validation::unknown_condition_type),
        help(
            "IR condition nodes must have type one of LEAF, AND, OR, EXISTS, \
             FORALL, NONE, COUNT. Check the translator input for a typo."
        )
    )]
    UnknownConditionType { tag: String },

    #[error("unknown effect operation: {operation}")]
    #[diagnostic(
        code(fabricator::validation::unknown_effect_operation),
        help("Effect operations must be one of: set, increment, decrement.")
    )]
    UnknownEffectOperation { operation: String },

    #[error("non-ground statement submitted as input: {statement_json}")]
    #[diagnostic(
        code(fabricator::validation::non_ground_input),
        help(
            "Statements added to a belief system's fact base must be ground \
             (contain no variable or wildcard terms). Bind all variables \
             before calling simulate()."
        )
    )]
    NonGroundInput { statement_json: String },

    #[error("malformed wildcard placement in pattern: {pattern_json}")]
    #[diagnostic(
        code(fabricator::validation::malformed_wildcard),
        help(
            "A greedy wildcard (term starting with '*') may appear at most \
             once in a LEAF pattern, and must be the last term."
        )
    )]
    MalformedWildcard { pattern_json: String },

    #[error("malformed IR tree: {reason}")]
    #[diagnostic(
        code(fabricator::validation::malformed_ir),
        help("{reason}")
    )]
    MalformedIr { reason: String },

    #[error("invalid count comparison operator: {operator}")]
    #[diagnostic(
        code(fabricator::validation::invalid_count_operator),
        help("COUNT operators must be one of: <, <=, =, >=, >.")
    )]
    InvalidCountOperator { operator: String },
}

// ---------------------------------------------------------------------------
// Model errors — invariant violations caught during canonicalization, before
// any belief-system state is touched.
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("AND/OR condition node has no children")]
    #[diagnostic(
        code(fabricator::model::empty_composite),
        help("AND and OR nodes must have at least one child condition.")
    )]
    EmptyComposite,

    #[error("cannot canonicalize a condition tree still containing OR: {condition_json}")]
    #[diagnostic(
        code(fabricator::model::or_not_eliminated),
        help(
            "Disjunction elimination must run before a condition reaches the \
             evaluator. This indicates a bug in the IR translator."
        )
    )]
    OrNotEliminated { condition_json: String },

    #[error("rule has no consequences")]
    #[diagnostic(
        code(fabricator::model::empty_consequences),
        help("A rule must have at least one statement or effect consequence.")
    )]
    EmptyConsequences,

    #[error("value could not be canonicalized for content-addressing: {reason}")]
    #[diagnostic(
        code(fabricator::model::unserializable),
        help("This indicates a value (e.g. a non-finite float) that cannot round-trip through canonical JSON.")
    )]
    Unserializable { reason: String },
}

// ---------------------------------------------------------------------------
// Engine invariant errors — violation of a §3 invariant discovered after a
// mutation was about to be applied. Fatal; not recoverable within the process.
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineInvariantError {
    #[error("duplicate content-equal statement reached the fact base outside of a coexist fork: {statement_json}")]
    #[diagnostic(
        code(fabricator::engine::duplicate_statement),
        help(
            "Two content-equal statements may only coexist in a belief system \
             produced by a coexist-family fork. This is a programming error in \
             the inference engine, not a user-facing condition."
        )
    )]
    DuplicateStatement { statement_json: String },

    #[error("non-ground statement reached the fact base: {statement_json}")]
    #[diagnostic(
        code(fabricator::engine::non_ground_fact),
        help(
            "Every statement in a fact base must be ground. This indicates a \
             rule consequence was instantiated with an unbound variable."
        )
    )]
    NonGroundFact { statement_json: String },

    #[error("fixed-point loop exceeded the iteration budget of {limit}")]
    #[diagnostic(
        code(fabricator::engine::iteration_budget_exceeded),
        help(
            "simulate() did not reach quiescence within max_fixed_point_iterations. \
             This should never happen for a well-formed rule set (rules that do \
             not invent fresh symbolic terms); check for a rule whose consequence \
             re-satisfies its own condition indefinitely."
        )
    )]
    IterationBudgetExceeded { limit: usize },

    #[error("causal memo replayed an already-applied (rule, binding) pair: {rule_id}")]
    #[diagnostic(
        code(fabricator::engine::memo_replay),
        help(
            "The causal memo is supposed to be monotonic: once (rule, binding) \
             is recorded its effects are never re-applied. This is a programming \
             error in the fixed-point loop."
        )
    )]
    MemoReplay { rule_id: String },
}

// ---------------------------------------------------------------------------
// Persistence errors — adapter failures. Carries the attempted operation name
// so a caller can retry against a healthy adapter.
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("persistence adapter operation '{operation}' failed: {message}")]
    #[diagnostic(
        code(fabricator::persistence::adapter_failed),
        help(
            "The persistence adapter raised an error while performing '{operation}'. \
             The in-memory simulation result is still valid; retry against a \
             healthy adapter if the failure was transient."
        )
    )]
    AdapterFailed { operation: String, message: String },

    #[error("redb transaction error during '{operation}': {message}")]
    #[diagnostic(
        code(fabricator::persistence::redb),
        help(
            "The embedded database encountered a transaction error. This may \
             indicate corruption — try running with a fresh data directory."
        )
    )]
    Redb { operation: String, message: String },

    #[error("serialization error during '{operation}': {message}")]
    #[diagnostic(
        code(fabricator::persistence::serde),
        help("Failed to serialize or deserialize a persisted record.")
    )]
    Serialization { operation: String, message: String },

    #[error("node not found: {kind} {id}")]
    #[diagnostic(
        code(fabricator::persistence::not_found),
        help("The requested graph node does not exist in the persistence adapter.")
    )]
    NotFound { kind: String, id: String },
}
