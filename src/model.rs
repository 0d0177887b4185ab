//! Core data model for Logic Fabricator: terms, statements, conditions,
//! effects, rules, and content-addressed identity.
//!
//! Statements and rules are canonical values keyed by content; callers pass
//! small `Copy` [`ContentId`] handles rather than sharing the condition trees
//! themselves, so a `Rule` lives once in a [`RuleTable`] no matter how many
//! belief systems reference it.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ModelError;

// ---------------------------------------------------------------------------
// Content-addressed identity
// ---------------------------------------------------------------------------

/// A content hash: the sha2-256 digest of a value's canonical JSON form.
///
/// `Copy`, small, and suitable as a map key — this is how rules and
/// conditions are referenced without cloning the tree they identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId([u8; 32]);

/// `Rule` identity is a `ContentId` over `(condition, consequences)`.
pub type RuleId = ContentId;
/// `Condition` identity, used when canonicalizing disjunction-eliminated trees.
pub type ConditionId = ContentId;
/// `Statement` identity, used by the persistence adapter's `MERGE`-by-content.
pub type StatementId = ContentId;

impl ContentId {
    /// Hash a serializable value via its canonical JSON form (object keys
    /// sorted, deterministic for content-equal values regardless of
    /// construction order).
    ///
    /// Serialization of the engine's own value types (terms, statements,
    /// conditions, rules) never fails; this returns `Result` anyway so a
    /// future consequence type containing e.g. a non-finite float still
    /// surfaces as a `ModelError` instead of a panic.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, ModelError> {
        let canonical = serde_json::to_value(value).map_err(|e| ModelError::Unserializable {
            reason: e.to_string(),
        })?;
        let bytes = serde_json::to_vec(&canonical).map_err(|e| ModelError::Unserializable {
            reason: e.to_string(),
        })?;
        let digest = Sha256::digest(&bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(ContentId(out))
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------

/// A single term in a statement or a `LEAF` pattern.
///
/// External IR uses sigil-prefixed strings (`?x`, `*w`); [`Term::parse`] is
/// the one place that sniffs the sigil. Everywhere else in the engine works
/// on this typed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// A concrete entity name.
    Const(String),
    /// A pattern variable (`?x`), binding to a single term.
    Var(String),
    /// A greedy wildcard (`*x`), binding to the remaining term list.
    Wildcard(String),
    /// A list value, produced when a wildcard binding is substituted into a
    /// derived statement's term position (rendered as a JSON array).
    List(Vec<String>),
}

impl Term {
    /// Parse a raw IR term string, sniffing the `?`/`*` sigil.
    pub fn parse(raw: &str) -> Term {
        if let Some(name) = raw.strip_prefix('*') {
            Term::Wildcard(name.to_string())
        } else if let Some(name) = raw.strip_prefix('?') {
            Term::Var(name.to_string())
        } else {
            Term::Const(raw.to_string())
        }
    }

    /// Whether this term is ground (contains no variable or wildcard).
    pub fn is_ground(&self) -> bool {
        matches!(self, Term::Const(_) | Term::List(_))
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Var(_))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Term::Wildcard(_))
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// An asserted or derived fact: a verb, a term list, a negation flag, and a
/// priority. Also used, pre-substitution, as a statement *template* inside a
/// rule's consequences (in which case its terms may contain variables).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub verb: String,
    pub terms: Vec<Term>,
    pub negated: bool,
    /// Metadata, not identity — excluded from [`Statement::content_key`].
    pub priority: i32,
}

impl Statement {
    pub fn new(verb: impl Into<String>, terms: Vec<Term>, negated: bool) -> Self {
        Self {
            verb: verb.into(),
            terms,
            negated,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// A statement is ground if none of its terms is a variable or wildcard.
    pub fn is_ground(&self) -> bool {
        self.terms.iter().all(Term::is_ground)
    }

    /// The `(verb, terms, negated)` identity tuple. Two statements are
    /// content-equal iff their content keys are equal; priority is metadata.
    pub fn content_key(&self) -> (String, Vec<Term>, bool) {
        (self.verb.clone(), self.terms.clone(), self.negated)
    }

    /// Whether `other` is the negation of `self` under content equality
    /// (same verb and terms, opposite `negated` flag).
    pub fn contradicts(&self, other: &Statement) -> bool {
        self.verb == other.verb && self.terms == other.terms && self.negated != other.negated
    }

    pub fn content_equal(&self, other: &Statement) -> bool {
        self.verb == other.verb && self.terms == other.terms && self.negated == other.negated
    }
}

// ---------------------------------------------------------------------------
// World state values
// ---------------------------------------------------------------------------

/// A value held in the world-state map or carried by an effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldValue {
    Number(f64),
    Text(String),
}

impl WorldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            WorldValue::Number(n) => Some(*n),
            WorldValue::Text(s) => s.parse().ok(),
        }
    }
}

impl std::fmt::Display for WorldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldValue::Number(n) => write!(f, "{n}"),
            WorldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The world-state key → value map, mutated by effects and invisible to
/// rule evaluation.
pub type WorldState = BTreeMap<String, WorldValue>;

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A comparison operator used by a `COUNT` condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl CountOp {
    pub fn parse(raw: &str) -> Option<CountOp> {
        match raw {
            "<" => Some(CountOp::Lt),
            "<=" => Some(CountOp::Le),
            "=" => Some(CountOp::Eq),
            ">=" => Some(CountOp::Ge),
            ">" => Some(CountOp::Gt),
            _ => None,
        }
    }

    pub fn holds(self, count: usize, value: usize) -> bool {
        match self {
            CountOp::Lt => count < value,
            CountOp::Le => count <= value,
            CountOp::Eq => count == value,
            CountOp::Ge => count >= value,
            CountOp::Gt => count > value,
        }
    }
}

/// A rule's precondition: a recursive tree of leaves, conjunctions, and
/// quantifiers. `Or` only ever appears before disjunction elimination; the
/// evaluator (`eval.rs`) assumes it has already been removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Leaf {
        verb: String,
        terms: Vec<Term>,
        negated: bool,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Exists(Box<Condition>),
    Forall {
        domain: Box<Condition>,
        property: Box<Condition>,
    },
    None(Box<Condition>),
    Count {
        child: Box<Condition>,
        operator: CountOp,
        value: usize,
    },
}

impl Condition {
    /// Whether this tree contains an `Or` node anywhere (disjunction not
    /// yet eliminated).
    pub fn contains_or(&self) -> bool {
        match self {
            Condition::Or(_) => true,
            Condition::And(cs) => cs.iter().any(Condition::contains_or),
            Condition::Exists(c) | Condition::None(c) | Condition::Count { child: c, .. } => {
                c.contains_or()
            }
            Condition::Forall { domain, property } => {
                domain.contains_or() || property.contains_or()
            }
            Condition::Leaf { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectOp {
    Set,
    Increment,
    Decrement,
}

/// A world-state mutation. `value` may be a `Var` before substitution (a
/// consequence template); after substitution it is always `Const`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub target_key: String,
    pub operation: EffectOp,
    pub value: Term,
}

// ---------------------------------------------------------------------------
// Forking strategy
// ---------------------------------------------------------------------------

/// The strategy a belief system uses to resolve a contradiction. A small
/// closed enumeration rather than a trait object: the four behaviors are
/// stable, and adding a fifth is an intentional language-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForkStrategy {
    /// Fork; child holds both the original and the negated statement.
    Coexist,
    /// Fork; the new statement keeps its priority, the old one is down-weighted.
    PrioritizeNew,
    /// Fork; the old statement keeps its priority, the new one is down-weighted.
    PrioritizeOld,
    /// No fork; the contradicting statement is rejected, parent unchanged.
    Preserve,
}

impl Default for ForkStrategy {
    fn default() -> Self {
        ForkStrategy::Coexist
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A rule consequence: a statement template or an effect template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Consequence {
    Statement(Statement),
    Effect(Effect),
}

/// An immutable pair of a condition and one or more consequences. A rule's
/// identity is the [`ContentId`] of the canonical JSON of
/// `(condition, consequences)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub condition: Condition,
    pub consequences: Vec<Consequence>,
}

impl Rule {
    pub fn new(condition: Condition, consequences: Vec<Consequence>) -> Result<Self, ModelError> {
        if consequences.is_empty() {
            return Err(ModelError::EmptyConsequences);
        }
        if condition.contains_or() {
            let condition_json =
                serde_json::to_string(&condition).unwrap_or_else(|_| "<unserializable>".into());
            return Err(ModelError::OrNotEliminated { condition_json });
        }
        Ok(Self {
            condition,
            consequences,
        })
    }

    pub fn id(&self) -> RuleId {
        // ContentId::of only fails on serialization of a Condition/Consequence
        // tree we have already validated in `Rule::new`; unwrap is safe here.
        ContentId::of(&(&self.condition, &self.consequences)).expect("rule content hashes")
    }
}

/// Content-addressed interning table for rules: belief systems store a
/// [`RuleId`] and look the full tree up here instead of cloning it.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: DashMap<RuleId, Arc<Rule>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a rule, returning its id. Interning an already-known rule is a
    /// no-op (the existing `Arc` is kept).
    pub fn intern(&self, rule: Rule) -> RuleId {
        let id = rule.id();
        self.rules.entry(id).or_insert_with(|| Arc::new(rule));
        id
    }

    pub fn get(&self, id: RuleId) -> Option<Arc<Rule>> {
        self.rules.get(&id).map(|r| Arc::clone(&r))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
