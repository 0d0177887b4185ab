//! IR translator: lowers the external parser's JSON tree into engine
//! objects, eliminating disjunction and lowering statement terms.
//!
//! Every function here is pure and synchronous; nothing in this module
//! touches a belief system's state. Malformed input surfaces as a
//! [`ValidationError`] carrying the offending JSON fragment rather than
//! just its type, so the diagnostic is actionable without a debugger.

use serde_json::Value;

use crate::error::ValidationError;
use crate::model::{Condition, Consequence, CountOp, Effect, EffectOp, Rule, Statement, Term};

/// Top-level IR envelope: `{"input_type": "rule"|"statement"|"question", "data": ...}`.
pub fn translate(envelope: &Value) -> Result<Translated, ValidationError> {
    let input_type = envelope
        .get("input_type")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MalformedIr {
            reason: "missing \"input_type\" field".into(),
        })?;
    let data = envelope.get("data").ok_or_else(|| ValidationError::MalformedIr {
        reason: "missing \"data\" field".into(),
    })?;

    match input_type {
        "rule" => Ok(Translated::Rules(translate_rule(data)?)),
        "statement" => Ok(Translated::Statement(translate_statement(data)?)),
        "question" => Err(ValidationError::MalformedIr {
            reason: "\"question\" input is not accepted by the engine (external collaborator concern)".into(),
        }),
        other => Err(ValidationError::MalformedIr {
            reason: format!("unknown input_type \"{other}\""),
        }),
    }
}

/// What a single IR envelope lowers to. A `"rule"` envelope may lower to
/// more than one engine [`Rule`] once disjunction elimination runs.
pub enum Translated {
    Rules(Vec<Rule>),
    Statement(Statement),
}

/// `data: {rule_type: "standard"|"effect", condition: IRCondition, consequence: IRStatement|IREffect}`.
///
/// `consequence` may also be a JSON array of statement/effect fragments —
/// the grammar in §6 only shows the single-consequence case, but scenario 2
/// (§8) requires a rule with *both* an effect and a statement consequence,
/// so a caller wanting dual consequences submits an array here (Open
/// Question resolved in `DESIGN.md`).
fn translate_rule(data: &Value) -> Result<Vec<Rule>, ValidationError> {
    let condition_json = data.get("condition").ok_or_else(|| ValidationError::MalformedIr {
        reason: "rule data missing \"condition\"".into(),
    })?;
    let condition = translate_condition(condition_json)?;

    let consequence_json = data.get("consequence").ok_or_else(|| ValidationError::MalformedIr {
        reason: "rule data missing \"consequence\"".into(),
    })?;
    let consequences = match consequence_json {
        Value::Array(items) => items
            .iter()
            .map(translate_consequence)
            .collect::<Result<Vec<_>, _>>()?,
        single => vec![translate_consequence(single)?],
    };

    let disjuncts = to_disjuncts(condition);
    disjuncts
        .into_iter()
        .map(|disjunct| {
            Rule::new(disjunct, consequences.clone()).map_err(|e| ValidationError::MalformedIr {
                reason: e.to_string(),
            })
        })
        .collect()
}

fn translate_consequence(value: &Value) -> Result<Consequence, ValidationError> {
    if value.get("target_world_state_key").is_some() {
        translate_effect(value).map(Consequence::Effect)
    } else {
        translate_statement_template(value).map(Consequence::Statement)
    }
}

/// `IREffect`: `{target_world_state_key, effect_operation, effect_value}`.
fn translate_effect(value: &Value) -> Result<Effect, ValidationError> {
    let target_key = value
        .get("target_world_state_key")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MalformedIr {
            reason: "effect missing string \"target_world_state_key\"".into(),
        })?
        .to_string();

    let op_raw = value
        .get("effect_operation")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MalformedIr {
            reason: "effect missing \"effect_operation\"".into(),
        })?;
    let operation = match op_raw {
        "set" => EffectOp::Set,
        "increment" => EffectOp::Increment,
        "decrement" => EffectOp::Decrement,
        other => {
            return Err(ValidationError::UnknownEffectOperation {
                operation: other.to_string(),
            })
        }
    };

    let value_raw = value
        .get("effect_value")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MalformedIr {
            reason: "effect missing string \"effect_value\"".into(),
        })?;

    Ok(Effect {
        target_key,
        operation,
        value: Term::parse(value_raw),
    })
}

/// A statement (or statement template, pre-substitution): `{subject, verb,
/// object, negated, modifiers}`. `subject`/`object` are each a string or an
/// array of strings; they are flattened and concatenated into the term
/// sequence (`modifiers` is accepted but currently unused — it has no
/// counterpart in the engine's `Statement` shape).
fn translate_statement_template(value: &Value) -> Result<Statement, ValidationError> {
    let verb = value
        .get("verb")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MalformedIr {
            reason: "statement missing string \"verb\"".into(),
        })?
        .to_string();
    let negated = value
        .get("negated")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut terms = Vec::new();
    if let Some(subject) = value.get("subject") {
        terms.extend(flatten_terms(subject)?);
    }
    if let Some(object) = value.get("object") {
        terms.extend(flatten_terms(object)?);
    }

    Ok(Statement::new(verb, terms, negated))
}

/// Parse a ground-or-variable statement from the external parser's
/// `"statement"` envelope, rejecting anything non-ground.
fn translate_statement(value: &Value) -> Result<Statement, ValidationError> {
    let statement = translate_statement_template(value)?;
    if !statement.is_ground() {
        return Err(ValidationError::NonGroundInput {
            statement_json: serde_json::to_string(&statement).unwrap_or_default(),
        });
    }
    Ok(statement)
}

fn flatten_terms(value: &Value) -> Result<Vec<Term>, ValidationError> {
    match value {
        Value::String(s) => Ok(vec![Term::parse(s)]),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(Term::parse(s)),
                    other => {
                        return Err(ValidationError::MalformedIr {
                            reason: format!("expected string term, found {other}"),
                        })
                    }
                }
            }
            Ok(out)
        }
        other => Err(ValidationError::MalformedIr {
            reason: format!("expected string or array of terms, found {other}"),
        }),
    }
}

/// `IRCondition`: a tagged tree, `type ∈ {LEAF, AND, OR, EXISTS, FORALL,
/// NONE, COUNT}`.
pub fn translate_condition(value: &Value) -> Result<Condition, ValidationError> {
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MalformedIr {
            reason: "condition missing \"type\"".into(),
        })?;

    match tag {
        "LEAF" => {
            let verb = value
                .get("verb")
                .and_then(Value::as_str)
                .ok_or_else(|| ValidationError::MalformedIr {
                    reason: "LEAF missing string \"verb\"".into(),
                })?
                .to_string();
            let negated = value
                .get("negated")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            let mut terms = Vec::new();
            if let Some(subject) = value.get("subject") {
                terms.extend(flatten_terms(subject)?);
            }
            if let Some(object) = value.get("object") {
                terms.extend(flatten_terms(object)?);
            }
            validate_wildcard_placement(&terms, value)?;

            Ok(Condition::Leaf {
                verb,
                terms,
                negated,
            })
        }
        "AND" => Ok(Condition::And(translate_children(value)?)),
        "OR" => Ok(Condition::Or(translate_children(value)?)),
        "EXISTS" => {
            let child = value.get("child").ok_or_else(|| ValidationError::MalformedIr {
                reason: "EXISTS missing \"child\"".into(),
            })?;
            Ok(Condition::Exists(Box::new(translate_condition(child)?)))
        }
        "FORALL" => {
            let domain = value.get("domain").ok_or_else(|| ValidationError::MalformedIr {
                reason: "FORALL missing \"domain\"".into(),
            })?;
            let property = value.get("property").ok_or_else(|| ValidationError::MalformedIr {
                reason: "FORALL missing \"property\"".into(),
            })?;
            Ok(Condition::Forall {
                domain: Box::new(translate_condition(domain)?),
                property: Box::new(translate_condition(property)?),
            })
        }
        "NONE" => {
            let child = value.get("child").ok_or_else(|| ValidationError::MalformedIr {
                reason: "NONE missing \"child\"".into(),
            })?;
            Ok(Condition::None(Box::new(translate_condition(child)?)))
        }
        "COUNT" => {
            let child = value.get("child").ok_or_else(|| ValidationError::MalformedIr {
                reason: "COUNT missing \"child\"".into(),
            })?;
            let operator_raw = value
                .get("operator")
                .and_then(Value::as_str)
                .ok_or_else(|| ValidationError::MalformedIr {
                    reason: "COUNT missing \"operator\"".into(),
                })?;
            let operator = CountOp::parse(operator_raw).ok_or_else(|| {
                ValidationError::InvalidCountOperator {
                    operator: operator_raw.to_string(),
                }
            })?;
            let count_value = value
                .get("value")
                .and_then(Value::as_u64)
                .ok_or_else(|| ValidationError::MalformedIr {
                    reason: "COUNT missing numeric \"value\"".into(),
                })? as usize;
            Ok(Condition::Count {
                child: Box::new(translate_condition(child)?),
                operator,
                value: count_value,
            })
        }
        other => Err(ValidationError::UnknownConditionType {
            tag: other.to_string(),
        }),
    }
}

fn translate_children(value: &Value) -> Result<Vec<Condition>, ValidationError> {
    let children = value
        .get("children")
        .and_then(Value::as_array)
        .ok_or_else(|| ValidationError::MalformedIr {
            reason: "AND/OR missing array \"children\"".into(),
        })?;
    children.iter().map(translate_condition).collect()
}

fn validate_wildcard_placement(terms: &[Term], value: &Value) -> Result<(), ValidationError> {
    let wildcard_positions: Vec<usize> = terms
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_wildcard())
        .map(|(i, _)| i)
        .collect();
    match wildcard_positions.as_slice() {
        [] => Ok(()),
        [pos] if *pos == terms.len() - 1 => Ok(()),
        _ => Err(ValidationError::MalformedWildcard {
            pattern_json: value.to_string(),
        }),
    }
}

/// Distribute every `OR` node through its ancestors, returning the
/// disjunctive normal form as a flat list of `OR`-free conditions (§4.4).
///
/// Combinatorial in the number of `OR` branches along any single path —
/// acceptable for the rule sizes this engine targets (see §2's size
/// budget), and no different in complexity from full DNF expansion in any
/// other rule engine.
fn to_disjuncts(condition: Condition) -> Vec<Condition> {
    match condition {
        Condition::Leaf { .. } => vec![condition],
        Condition::Or(children) => children.into_iter().flat_map(to_disjuncts).collect(),
        Condition::And(children) => {
            let mut acc = vec![Vec::new()];
            for child in children {
                let child_disjuncts = to_disjuncts(child);
                let mut next = Vec::with_capacity(acc.len() * child_disjuncts.len());
                for prefix in &acc {
                    for d in &child_disjuncts {
                        let mut combo = prefix.clone();
                        combo.push(d.clone());
                        next.push(combo);
                    }
                }
                acc = next;
            }
            acc.into_iter().map(Condition::And).collect()
        }
        Condition::Exists(child) => to_disjuncts(*child)
            .into_iter()
            .map(|d| Condition::Exists(Box::new(d)))
            .collect(),
        Condition::None(child) => to_disjuncts(*child)
            .into_iter()
            .map(|d| Condition::None(Box::new(d)))
            .collect(),
        Condition::Count {
            child,
            operator,
            value,
        } => to_disjuncts(*child)
            .into_iter()
            .map(|d| Condition::Count {
                child: Box::new(d),
                operator,
                value,
            })
            .collect(),
        Condition::Forall { domain, property } => {
            let domains = to_disjuncts(*domain);
            let properties = to_disjuncts(*property);
            let mut out = Vec::with_capacity(domains.len() * properties.len());
            for d in &domains {
                for p in &properties {
                    out.push(Condition::Forall {
                        domain: Box::new(d.clone()),
                        property: Box::new(p.clone()),
                    });
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn translates_leaf_condition_and_statement_consequence() {
        let envelope = json!({
            "input_type": "rule",
            "data": {
                "rule_type": "standard",
                "condition": {
                    "type": "LEAF",
                    "subject": "?x",
                    "verb": "is",
                    "object": "man",
                    "negated": false
                },
                "consequence": {
                    "subject": "?x",
                    "verb": "is",
                    "object": "mortal",
                    "negated": false
                }
            }
        });
        let Translated::Rules(rules) = translate(&envelope).unwrap() else {
            panic!("expected Rules");
        };
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].consequences.len(), 1);
    }

    #[test]
    fn disjunction_elimination_produces_one_rule_per_disjunct() {
        let envelope = json!({
            "input_type": "rule",
            "data": {
                "rule_type": "standard",
                "condition": {
                    "type": "OR",
                    "children": [
                        {"type": "LEAF", "subject": "?x", "verb": "is", "object": "king", "negated": false},
                        {"type": "LEAF", "subject": "?x", "verb": "is", "object": "queen", "negated": false}
                    ]
                },
                "consequence": {
                    "subject": "?x",
                    "verb": "is",
                    "object": "royal",
                    "negated": false
                }
            }
        });
        let Translated::Rules(rules) = translate(&envelope).unwrap() else {
            panic!("expected Rules");
        };
        assert_eq!(rules.len(), 2);
        for rule in &rules {
            assert!(!rule.condition.contains_or());
        }
    }

    #[test]
    fn or_inside_and_distributes_to_two_conjunctions() {
        let condition = translate_condition(&json!({
            "type": "AND",
            "children": [
                {"type": "LEAF", "subject": "?x", "verb": "is", "object": "man", "negated": false},
                {
                    "type": "OR",
                    "children": [
                        {"type": "LEAF", "subject": "?x", "verb": "is", "object": "brave", "negated": false},
                        {"type": "LEAF", "subject": "?x", "verb": "is", "object": "wise", "negated": false}
                    ]
                }
            ]
        }))
        .unwrap();
        let disjuncts = to_disjuncts(condition);
        assert_eq!(disjuncts.len(), 2);
        for d in &disjuncts {
            assert!(!d.contains_or());
        }
    }

    #[test]
    fn dual_consequence_array_lowers_to_one_rule_two_consequences() {
        let envelope = json!({
            "input_type": "rule",
            "data": {
                "rule_type": "standard",
                "condition": {
                    "type": "LEAF",
                    "subject": "?x",
                    "verb": "is",
                    "object": "mortal",
                    "negated": false
                },
                "consequence": [
                    {
                        "target_world_state_key": "mortal_count",
                        "effect_operation": "increment",
                        "effect_value": "1"
                    },
                    {
                        "subject": "?x",
                        "verb": "counted",
                        "object": [],
                        "negated": false
                    }
                ]
            }
        });
        let Translated::Rules(rules) = translate(&envelope).unwrap() else {
            panic!("expected Rules");
        };
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].consequences.len(), 2);
    }

    #[test]
    fn wildcard_statement_lowers_statement_and_object() {
        let condition = translate_condition(&json!({
            "type": "LEAF",
            "subject": "?s",
            "verb": "says",
            "object": "*w",
            "negated": false
        }))
        .unwrap();
        match condition {
            Condition::Leaf { terms, .. } => {
                assert_eq!(terms.len(), 2);
                assert!(terms[1].is_wildcard());
            }
            _ => panic!("expected Leaf"),
        }
    }

    #[test]
    fn wildcard_not_last_is_rejected() {
        let err = translate_condition(&json!({
            "type": "LEAF",
            "subject": "*w",
            "verb": "says",
            "object": "hello",
            "negated": false
        }))
        .unwrap_err();
        assert!(matches!(err, ValidationError::MalformedWildcard { .. }));
    }

    #[test]
    fn non_ground_statement_input_is_rejected() {
        let envelope = json!({
            "input_type": "statement",
            "data": {
                "subject": "?x",
                "verb": "is",
                "object": "man",
                "negated": false
            }
        });
        let err = translate(&envelope).unwrap_err();
        assert!(matches!(err, ValidationError::NonGroundInput { .. }));
    }

    #[test]
    fn ground_statement_input_translates() {
        let envelope = json!({
            "input_type": "statement",
            "data": {
                "subject": "socrates",
                "verb": "is",
                "object": "man",
                "negated": false
            }
        });
        let Translated::Statement(statement) = translate(&envelope).unwrap() else {
            panic!("expected Statement");
        };
        assert!(statement.is_ground());
        assert_eq!(statement.verb, "is");
    }

    #[test]
    fn unknown_condition_type_is_rejected() {
        let err = translate_condition(&json!({"type": "XOR"})).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownConditionType { .. }));
    }

    #[test]
    fn unknown_effect_operation_is_rejected() {
        let err = translate_effect(&json!({
            "target_world_state_key": "k",
            "effect_operation": "multiply",
            "effect_value": "2"
        }))
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownEffectOperation { .. }));
    }
}
