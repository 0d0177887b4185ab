//! Condition evaluator: matches a condition tree against a fact base,
//! yielding the set of binding environments under which it holds (§4.2).
//!
//! `Or` must already be eliminated by the IR translator (`ir.rs`) before a
//! condition reaches this evaluator; `eval` treats encountering one as a
//! bug, not a user-facing error (see `Condition::contains_or` used at rule
//! construction time in `model.rs`).

use std::collections::HashSet;

use crate::model::{Condition, Statement, Term};
use crate::unify::{unify_leaf, Binding};

/// Evaluate a condition against `facts`, extending `env`.
///
/// Quantified nodes (`Exists`, `Forall`, `None`, `Count`) never leak their
/// inner bindings outward; only `Leaf` and `And` contribute new bindings to
/// the returned environments.
pub fn eval(condition: &Condition, facts: &[Statement], env: &Binding) -> Vec<Binding> {
    match condition {
        Condition::Leaf {
            verb,
            terms,
            negated,
        } => facts
            .iter()
            .filter_map(|fact| unify_leaf(verb, terms, *negated, fact, env))
            .collect(),

        Condition::And(children) => {
            // Reorder: push the most selective (fewest-bindings) child first
            // in practice by simply folding in authored order — the result
            // set is order-independent per §4.2, so any fixed strategy is
            // correct; we keep authored order for readable diagnostics.
            let mut envs = vec![env.clone()];
            for child in children {
                let mut next = Vec::new();
                for e in &envs {
                    next.extend(eval(child, facts, e));
                }
                envs = next;
                if envs.is_empty() {
                    break;
                }
            }
            envs
        }

        Condition::Or(_) => {
            // The IR translator eliminates Or before a rule is constructed
            // (`Rule::new` rejects a condition tree still containing one).
            // Treat survival to evaluation as vacuous rather than panic.
            Vec::new()
        }

        Condition::Exists(child) => {
            if !eval(child, facts, env).is_empty() {
                vec![env.clone()]
            } else {
                Vec::new()
            }
        }

        Condition::Forall { domain, property } => {
            let domain_envs = eval(domain, facts, env);
            let holds = domain_envs
                .iter()
                .all(|e| !eval(property, facts, e).is_empty());
            if holds {
                vec![env.clone()]
            } else {
                Vec::new()
            }
        }

        Condition::None(child) => {
            if eval(child, facts, env).is_empty() {
                vec![env.clone()]
            } else {
                Vec::new()
            }
        }

        Condition::Count {
            child,
            operator,
            value,
        } => {
            let count = distinct_count(&eval(child, facts, env));
            if operator.holds(count, *value) {
                vec![env.clone()]
            } else {
                Vec::new()
            }
        }
    }
}

/// The number of *distinct* binding environments, for `Count` evaluation.
fn distinct_count(envs: &[Binding]) -> usize {
    let mut seen: HashSet<Vec<(String, Term)>> = HashSet::new();
    for env in envs {
        let mut pairs: Vec<(String, Term)> =
            env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        seen.insert(pairs);
    }
    seen.len()
}
