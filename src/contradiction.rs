//! Contradiction handling (§4.5): the statement-level check already lives on
//! [`Statement::contradicts`]; this module adds proactive rule-level tension
//! detection and the fork engine that turns a detected contradiction into a
//! child fact base under one of the four [`ForkStrategy`] behaviors.

use std::sync::Arc;

use rayon::prelude::*;

use crate::eval;
use crate::infer::{self, CausalMemo};
use crate::model::{Condition, ContentId, ForkStrategy, Rule, RuleId, Statement, Term, WorldState};
use crate::unify::Binding;

/// A pair of rules whose conditions are simultaneously satisfiable under
/// some binding, and whose consequences (possibly after expanding through a
/// context rule) yield a statement and its negation.
///
/// Tension detection is best-effort and proactive: finding none is not a
/// guarantee the rule set is consistent, only that this search found no
/// witness within `tension_context_hops` hops.
#[derive(Debug, Clone)]
pub struct Tension {
    pub rule_a: RuleId,
    pub rule_b: RuleId,
    /// The binding under which both rules' conditions hold and their
    /// consequences collide.
    pub witness: Binding,
}

/// Search every pair of `rules` for a tension, optionally expanding through
/// `context_rules` (facts reachable by forward-chaining just those rules,
/// bounded by `hops`) before checking whether the second rule's condition is
/// satisfiable.
///
/// Only rules whose condition is a `LEAF` or a conjunction of leaves are
/// considered; a rule using `EXISTS`/`FORALL`/`NONE`/`COUNT`/`OR` at the top
/// level is silently skipped rather than attempted, since synthesizing a
/// witness for a quantified condition has no single canonical answer.
pub fn report_tensions(
    rules: &[Arc<Rule>],
    context_rules: &[Arc<Rule>],
    hops: usize,
) -> Vec<Tension> {
    // Every pair is checked independently and read-only (no shared mutable
    // state, no belief system touched); rayon fans the O(n^2) scan out across
    // cores. Never used inside `simulate`'s single-threaded fixed-point loop.
    (0..rules.len())
        .into_par_iter()
        .flat_map(|i| {
            ((i + 1)..rules.len())
                .into_par_iter()
                .filter_map(move |j| check_pair(&rules[i], &rules[j], context_rules, hops))
        })
        .collect()
}

fn check_pair(
    rule_a: &Arc<Rule>,
    rule_b: &Arc<Rule>,
    context_rules: &[Arc<Rule>],
    hops: usize,
) -> Option<Tension> {
    let leaves_a = leaves_of(&rule_a.condition)?;
    let (mut reachable, env_a) = synthesize_witness(&leaves_a);

    // Expand the synthetic seed facts through the context rules to see what
    // else becomes true from rule_a's condition holding. `run_fixed_point`
    // mutates `reachable` in place even if it later returns an iteration-
    // budget error, so a partial expansion is still useful on that path.
    let mut memo = CausalMemo::new();
    let mut world_state = WorldState::new();
    let _ = infer::run_fixed_point(
        context_rules,
        &mut reachable,
        &mut world_state,
        &mut memo,
        hops.max(1),
    );

    let env_b = eval::eval(&rule_b.condition, &reachable, &Binding::new())
        .into_iter()
        .next()?;

    let statements_a = infer::consequence_statements(rule_a, &env_a);
    let statements_b = infer::consequence_statements(rule_b, &env_b);

    for sa in statements_a.iter().chain(reachable.iter()) {
        for sb in statements_b.iter().chain(reachable.iter()) {
            if sa.contradicts(sb) {
                let mut witness = env_a.clone();
                witness.extend(env_b.clone());
                return Some(Tension {
                    rule_a: rule_a.id(),
                    rule_b: rule_b.id(),
                    witness,
                });
            }
        }
    }
    None
}

/// Flatten a condition into its leaves, if it is a `LEAF` or an `AND` of
/// leaves. Any other node (a quantifier, or `OR`, which should never survive
/// to a constructed `Rule` anyway) makes the condition unsuitable for
/// witness synthesis.
fn leaves_of(condition: &Condition) -> Option<Vec<(String, Vec<Term>, bool)>> {
    match condition {
        Condition::Leaf {
            verb,
            terms,
            negated,
        } => Some(vec![(verb.clone(), terms.clone(), *negated)]),
        Condition::And(children) => {
            let mut out = Vec::new();
            for child in children {
                out.extend(leaves_of(child)?);
            }
            Some(out)
        }
        _ => None,
    }
}

/// Build a minimal synthetic fact base that satisfies `leaves` by
/// construction, assigning each distinct variable a fresh synthetic
/// constant (the same constant for repeated uses of the same variable
/// name within the rule) and each wildcard an empty list.
fn synthesize_witness(leaves: &[(String, Vec<Term>, bool)]) -> (Vec<Statement>, Binding) {
    let mut env = Binding::new();
    let mut next_id = 0usize;
    let mut facts = Vec::new();

    for (verb, terms, negated) in leaves {
        let mut ground_terms = Vec::with_capacity(terms.len());
        for term in terms {
            let ground = match term {
                Term::Const(s) => Term::Const(s.clone()),
                Term::Var(name) => env
                    .entry(name.clone())
                    .or_insert_with(|| {
                        next_id += 1;
                        Term::Const(format!("_witness{next_id}"))
                    })
                    .clone(),
                Term::Wildcard(name) => env
                    .entry(name.clone())
                    .or_insert_with(|| Term::List(Vec::new()))
                    .clone(),
                Term::List(items) => Term::List(items.clone()),
            };
            ground_terms.push(ground);
        }
        facts.push(Statement::new(verb.clone(), ground_terms, *negated));
    }

    (facts, env)
}

/// Resolve a contradiction between `existing` and `incoming` under
/// `strategy`, returning the child belief system's fact base, or `None` if
/// `strategy` rejects the incoming statement without forking (`Preserve`).
///
/// `existing`/`incoming` are located by [`Statement::content_equal`] rather
/// than by reference identity, since `parent_facts` is a fresh clone handed
/// in by the belief-system façade.
pub fn resolve_fork(
    strategy: ForkStrategy,
    parent_facts: &[Statement],
    existing: &Statement,
    incoming: &Statement,
) -> Option<Vec<Statement>> {
    match strategy {
        ForkStrategy::Preserve => None,

        ForkStrategy::Coexist => {
            let mut child = parent_facts.to_vec();
            child.push(incoming.clone());
            Some(child)
        }

        ForkStrategy::PrioritizeNew => {
            let mut child = parent_facts.to_vec();
            for fact in child.iter_mut() {
                if fact.content_equal(existing) {
                    fact.priority = fact.priority.saturating_sub(1);
                }
            }
            child.push(incoming.clone());
            Some(child)
        }

        ForkStrategy::PrioritizeOld => {
            let mut child = parent_facts.to_vec();
            let mut demoted = incoming.clone();
            demoted.priority = demoted.priority.saturating_sub(1);
            child.push(demoted);
            Some(child)
        }
    }
}

/// A stable witness binding's [`ContentId`], used when a caller wants to
/// deduplicate tensions reported across repeated calls (e.g. re-checking
/// after adding one new rule).
pub fn tension_id(tension: &Tension) -> Option<ContentId> {
    let mut pairs: Vec<(String, Term)> = tension
        .witness
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    ContentId::of(&(tension.rule_a, tension.rule_b, pairs)).ok()
}
