//! Fixed-point inference engine: applies rules to a fact base until
//! quiescence or contradiction, mutating world state via effects (§4.3).

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::EngineInvariantError;
use crate::eval;
use crate::model::{
    Consequence, ContentId, Effect, EffectOp, Rule, RuleId, Statement, Term, WorldState, WorldValue,
};
use crate::unify::Binding;

/// The record of `(rule_id, binding)` pairs already fired in a belief
/// system. Monotonic: once a pair is recorded its consequences are never
/// re-applied (§3 invariant 3).
#[derive(Debug, Default, Clone)]
pub struct CausalMemo(HashSet<(RuleId, ContentId)>);

impl CausalMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, rule_id: RuleId, binding_id: ContentId) -> bool {
        self.0.contains(&(rule_id, binding_id))
    }

    pub fn record(&mut self, rule_id: RuleId, binding_id: ContentId) -> bool {
        self.0.insert((rule_id, binding_id))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything produced by one `run_fixed_point` call (or the portion of it
/// completed before a contradiction aborted the loop).
#[derive(Debug, Clone, Default)]
pub struct FixedPointReport {
    /// Derived statements, in the order they were added.
    pub derived_facts: Vec<Statement>,
    /// `(rule_id, binding)` pairs that fired.
    pub applied_rules: Vec<(RuleId, Binding)>,
    /// Effects applied, in the deterministic order defined by §4.3.
    pub effects_applied: Vec<Effect>,
}

/// Outcome of running the fixed-point loop to completion or to the first
/// contradiction.
pub enum FixedPointOutcome {
    /// The fact base reached a stable point; no contradiction occurred.
    Quiescent(FixedPointReport),
    /// A derived statement contradicted an existing fact. `report` carries
    /// everything applied before the abort; the caller (the belief system
    /// façade) hands `existing`/`incoming` to the fork engine.
    Contradiction {
        existing: Statement,
        incoming: Statement,
        report: FixedPointReport,
    },
}

/// Run the fixed-point loop against `facts`/`world_state`/`memo` in place.
///
/// `max_iterations` is the defensive backstop from `EngineConfig`; it is
/// never expected to trigger for a well-formed rule set (see `infer`
/// module docs and `EngineInvariantError::IterationBudgetExceeded`).
pub fn run_fixed_point(
    rules: &[Arc<Rule>],
    facts: &mut Vec<Statement>,
    world_state: &mut WorldState,
    memo: &mut CausalMemo,
    max_iterations: usize,
) -> Result<FixedPointOutcome, EngineInvariantError> {
    let mut report = FixedPointReport::default();
    let mut iteration = 0usize;

    loop {
        iteration += 1;
        if iteration > max_iterations {
            return Err(EngineInvariantError::IterationBudgetExceeded {
                limit: max_iterations,
            });
        }

        // Phase 1: evaluate every rule against the iteration's starting fact
        // base, collecting every (rule, binding) not already memoized.
        let mut instantiations: Vec<(RuleId, ContentId, Binding, Arc<Rule>)> = Vec::new();
        for rule in rules {
            let rule_id = rule.id();
            for env in eval::eval(&rule.condition, facts, &Binding::new()) {
                let binding_id = binding_content_id(&env);
                if memo.contains(rule_id, binding_id) {
                    continue;
                }
                instantiations.push((rule_id, binding_id, env, Arc::clone(rule)));
            }
        }

        if instantiations.is_empty() {
            return Ok(FixedPointOutcome::Quiescent(report));
        }

        tracing::debug!(
            iteration,
            facts = facts.len(),
            firing = instantiations.len(),
            "fixed-point iteration"
        );

        // Phase 2: apply every firing instantiation in deterministic order —
        // sorted by (rule canonical id, binding canonical id); within one
        // instantiation, consequences apply in their authored index order.
        instantiations.sort_by_key(|(rule_id, binding_id, _, _)| (*rule_id, *binding_id));

        for (rule_id, binding_id, env, rule) in instantiations {
            for consequence in &rule.consequences {
                match consequence {
                    Consequence::Statement(template) => {
                        let derived = instantiate_statement(template, &env).ok_or_else(|| {
                            EngineInvariantError::NonGroundFact {
                                statement_json: format!("{template:?}"),
                            }
                        })?;
                        if !derived.is_ground() {
                            return Err(EngineInvariantError::NonGroundFact {
                                statement_json: serde_json::to_string(&derived)
                                    .unwrap_or_default(),
                            });
                        }
                        if facts.iter().any(|f| f.content_equal(&derived)) {
                            continue;
                        }
                        if let Some(existing) =
                            facts.iter().find(|f| f.contradicts(&derived)).cloned()
                        {
                            return Ok(FixedPointOutcome::Contradiction {
                                existing,
                                incoming: derived,
                                report,
                            });
                        }
                        facts.push(derived.clone());
                        report.derived_facts.push(derived);
                    }
                    Consequence::Effect(template) => {
                        let effect = instantiate_effect(template, &env).ok_or_else(|| {
                            EngineInvariantError::NonGroundFact {
                                statement_json: format!("{template:?}"),
                            }
                        })?;
                        apply_effect(world_state, &effect);
                        report.effects_applied.push(effect);
                    }
                }
            }
            memo.record(rule_id, binding_id);
            report.applied_rules.push((rule_id, env));
        }
    }
}

/// Canonical id of a binding environment, used as the memo's second key and
/// for the deterministic effect-ordering sort.
fn binding_content_id(env: &Binding) -> ContentId {
    let mut pairs: Vec<(String, Term)> = env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    ContentId::of(&pairs).expect("binding content hashes")
}

/// Instantiate every statement consequence of `rule` under `env`, discarding
/// effect consequences and any template whose substitution is incomplete.
/// Used directly by the fixed-point loop, and reused by `contradiction.rs`'s
/// tension detector to compute a rule's hypothetical consequences without
/// running a full simulation.
pub(crate) fn consequence_statements(rule: &Rule, env: &Binding) -> Vec<Statement> {
    rule.consequences
        .iter()
        .filter_map(|c| match c {
            Consequence::Statement(template) => instantiate_statement(template, env),
            Consequence::Effect(_) => None,
        })
        .collect()
}

/// Substitute a statement template's variables from `env`. Wildcards must
/// never appear in a consequence template (only in `LEAF` patterns);
/// encountering one here is a malformed-rule condition, reported as `None`.
pub(crate) fn instantiate_statement(template: &Statement, env: &Binding) -> Option<Statement> {
    let mut terms = Vec::with_capacity(template.terms.len());
    for term in &template.terms {
        terms.push(substitute_term(term, env)?);
    }
    Some(
        Statement::new(template.verb.clone(), terms, template.negated)
            .with_priority(template.priority),
    )
}

fn instantiate_effect(template: &Effect, env: &Binding) -> Option<Effect> {
    Some(Effect {
        target_key: template.target_key.clone(),
        operation: template.operation,
        value: substitute_term(&template.value, env)?,
    })
}

fn substitute_term(term: &Term, env: &Binding) -> Option<Term> {
    match term {
        Term::Const(_) | Term::List(_) => Some(term.clone()),
        Term::Var(name) => env.get(name).cloned(),
        Term::Wildcard(_) => None,
    }
}

/// Apply one effect to the world state. `increment`/`decrement` treat an
/// absent key as numeric 0; `set` replaces unconditionally.
pub fn apply_effect(world_state: &mut WorldState, effect: &Effect) {
    match effect.operation {
        EffectOp::Set => {
            let value = match &effect.value {
                Term::Const(s) => s
                    .parse::<f64>()
                    .map(WorldValue::Number)
                    .unwrap_or_else(|_| WorldValue::Text(s.clone())),
                other => WorldValue::Text(format!("{other:?}")),
            };
            world_state.insert(effect.target_key.clone(), value);
        }
        EffectOp::Increment | EffectOp::Decrement => {
            let delta = term_as_number(&effect.value);
            let signed_delta = if effect.operation == EffectOp::Decrement {
                -delta
            } else {
                delta
            };
            let current = world_state
                .get(&effect.target_key)
                .and_then(WorldValue::as_number)
                .unwrap_or(0.0);
            world_state.insert(
                effect.target_key.clone(),
                WorldValue::Number(current + signed_delta),
            );
        }
    }
}

fn term_as_number(term: &Term) -> f64 {
    match term {
        Term::Const(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Condition, Rule};

    fn leaf(verb: &str, terms: Vec<Term>) -> Condition {
        Condition::Leaf {
            verb: verb.into(),
            terms,
            negated: false,
        }
    }

    fn syllogism_rule() -> Arc<Rule> {
        Arc::new(
            Rule::new(
                leaf("is", vec![Term::Var("x".into()), Term::Const("man".into())]),
                vec![Consequence::Statement(Statement::new(
                    "is",
                    vec![Term::Var("x".into()), Term::Const("mortal".into())],
                    false,
                ))],
            )
            .unwrap(),
        )
    }

    #[test]
    fn single_hop_inference_derives_mortal() {
        let rules = vec![syllogism_rule()];
        let mut facts = vec![Statement::new(
            "is",
            vec![Term::Const("socrates".into()), Term::Const("man".into())],
            false,
        )];
        let mut world_state = WorldState::new();
        let mut memo = CausalMemo::new();

        let outcome = run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 10_000)
            .unwrap();
        match outcome {
            FixedPointOutcome::Quiescent(report) => {
                assert_eq!(report.derived_facts.len(), 1);
                assert_eq!(report.derived_facts[0].verb, "is");
            }
            FixedPointOutcome::Contradiction { .. } => panic!("unexpected contradiction"),
        }
        assert_eq!(facts.len(), 2);
    }

    #[test]
    fn idempotent_second_run_adds_nothing() {
        let rules = vec![syllogism_rule()];
        let mut facts = vec![Statement::new(
            "is",
            vec![Term::Const("socrates".into()), Term::Const("man".into())],
            false,
        )];
        let mut world_state = WorldState::new();
        let mut memo = CausalMemo::new();

        run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 10_000).unwrap();
        let second = run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 10_000)
            .unwrap();
        match second {
            FixedPointOutcome::Quiescent(report) => assert!(report.derived_facts.is_empty()),
            FixedPointOutcome::Contradiction { .. } => panic!("unexpected contradiction"),
        }
    }

    #[test]
    fn chained_dual_consequence_updates_world_state_once() {
        let rules = vec![
            syllogism_rule(),
            Arc::new(
                Rule::new(
                    leaf(
                        "is",
                        vec![Term::Var("x".into()), Term::Const("mortal".into())],
                    ),
                    vec![
                        Consequence::Effect(Effect {
                            target_key: "mortal_count".into(),
                            operation: EffectOp::Increment,
                            value: Term::Const("1".into()),
                        }),
                        Consequence::Statement(Statement::new(
                            "counted",
                            vec![Term::Var("x".into())],
                            false,
                        )),
                    ],
                )
                .unwrap(),
            ),
        ];
        let mut facts = vec![Statement::new(
            "is",
            vec![Term::Const("socrates".into()), Term::Const("man".into())],
            false,
        )];
        let mut world_state = WorldState::new();
        let mut memo = CausalMemo::new();

        run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 10_000).unwrap();
        assert_eq!(world_state.get("mortal_count"), Some(&WorldValue::Number(1.0)));

        run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 10_000).unwrap();
        assert_eq!(world_state.get("mortal_count"), Some(&WorldValue::Number(1.0)));
    }

    #[test]
    fn wildcard_rule_derives_list_term() {
        let rules = vec![Arc::new(
            Rule::new(
                leaf(
                    "says",
                    vec![Term::Var("s".into()), Term::Wildcard("w".into())],
                ),
                vec![Consequence::Statement(Statement::new(
                    "transcript_of",
                    vec![Term::Var("w".into())],
                    false,
                ))],
            )
            .unwrap(),
        )];
        let mut facts = vec![Statement::new(
            "says",
            vec![
                Term::Const("ravi".into()),
                Term::Const("hello".into()),
                Term::Const("world".into()),
                Term::Const("how".into()),
                Term::Const("are".into()),
                Term::Const("you".into()),
            ],
            false,
        )];
        let mut world_state = WorldState::new();
        let mut memo = CausalMemo::new();

        run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 10_000).unwrap();
        let derived = facts
            .iter()
            .find(|f| f.verb == "transcript_of")
            .expect("transcript_of derived");
        assert_eq!(
            derived.terms[0],
            Term::List(vec![
                "hello".into(),
                "world".into(),
                "how".into(),
                "are".into(),
                "you".into()
            ])
        );
    }

    #[test]
    fn conjunction_rule_fires_only_once_both_facts_present() {
        let rules = vec![Arc::new(
            Rule::new(
                Condition::And(vec![
                    leaf("is", vec![Term::Var("x".into()), Term::Const("king".into())]),
                    leaf("is", vec![Term::Var("x".into()), Term::Const("wise".into())]),
                ]),
                vec![Consequence::Statement(Statement::new(
                    "is",
                    vec![Term::Var("x".into()), Term::Const("good_ruler".into())],
                    false,
                ))],
            )
            .unwrap(),
        )];
        let mut facts = vec![Statement::new(
            "is",
            vec![Term::Const("arthur".into()), Term::Const("king".into())],
            false,
        )];
        let mut world_state = WorldState::new();
        let mut memo = CausalMemo::new();

        let first = run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 10_000)
            .unwrap();
        match first {
            FixedPointOutcome::Quiescent(report) => assert!(report.derived_facts.is_empty()),
            FixedPointOutcome::Contradiction { .. } => panic!("unexpected contradiction"),
        }

        facts.push(Statement::new(
            "is",
            vec![Term::Const("arthur".into()), Term::Const("wise".into())],
            false,
        ));
        let second = run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 10_000)
            .unwrap();
        match second {
            FixedPointOutcome::Quiescent(report) => assert_eq!(report.derived_facts.len(), 1),
            FixedPointOutcome::Contradiction { .. } => panic!("unexpected contradiction"),
        }
    }

    #[test]
    fn contradiction_aborts_loop_and_reports_statements() {
        let rules = vec![Arc::new(
            Rule::new(
                leaf("is", vec![Term::Var("x".into()), Term::Const("man".into())]),
                vec![Consequence::Statement(
                    Statement::new("is", vec![Term::Var("x".into()), Term::Const("mortal".into())], true),
                )],
            )
            .unwrap(),
        )];
        let mut facts = vec![
            Statement::new("is", vec![Term::Const("socrates".into()), Term::Const("man".into())], false),
            Statement::new("is", vec![Term::Const("socrates".into()), Term::Const("mortal".into())], false),
        ];
        let mut world_state = WorldState::new();
        let mut memo = CausalMemo::new();

        let outcome = run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 10_000)
            .unwrap();
        match outcome {
            FixedPointOutcome::Contradiction { existing, incoming, .. } => {
                assert!(existing.contradicts(&incoming));
            }
            FixedPointOutcome::Quiescent(_) => panic!("expected contradiction"),
        }
    }

    #[test]
    fn iteration_budget_exceeded_is_reported_not_an_infinite_loop() {
        // A rule whose own consequence re-satisfies a distinct, never-before-seen
        // binding each time would violate the termination argument; we simulate
        // the defensive backstop directly by using a budget of 0 iterations.
        let rules = vec![syllogism_rule()];
        let mut facts = vec![Statement::new(
            "is",
            vec![Term::Const("socrates".into()), Term::Const("man".into())],
            false,
        )];
        let mut world_state = WorldState::new();
        let mut memo = CausalMemo::new();

        let err = run_fixed_point(&rules, &mut facts, &mut world_state, &mut memo, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineInvariantError::IterationBudgetExceeded { limit: 0 }
        ));
    }
}
