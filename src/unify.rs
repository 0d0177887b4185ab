//! Unification: matching a `LEAF` pattern against a ground statement and
//! producing the resulting variable bindings (§4.1).

use std::collections::HashMap;

use crate::model::{Statement, Term};

/// A variable → term binding. Ordinary variables bind to a single `Const`
/// term; a greedy wildcard binds to a `List`.
pub type Binding = HashMap<String, Term>;

/// Attempt to unify a `LEAF(verb, terms, negated)` pattern against a ground
/// statement, extending `base`.
///
/// Returns `None` if the verb, negation, or terms don't match; otherwise the
/// binding environment extending `base` with any newly bound variables.
/// Fails if a variable is already bound in `base` to a different value than
/// the one required here (consistency check).
pub fn unify_leaf(
    pattern_verb: &str,
    pattern_terms: &[Term],
    pattern_negated: bool,
    statement: &Statement,
    base: &Binding,
) -> Option<Binding> {
    if pattern_verb != statement.verb || pattern_negated != statement.negated {
        return None;
    }

    let wildcard_pos = pattern_terms.iter().position(Term::is_wildcard);
    if let Some(pos) = wildcard_pos {
        // A greedy wildcard must be the last pattern term (validated by the
        // IR translator / canonicalizer); defend here too rather than trust
        // the caller blindly.
        if pos != pattern_terms.len() - 1 {
            return None;
        }
        if statement.terms.len() < pattern_terms.len() - 1 {
            return None;
        }
    } else if pattern_terms.len() != statement.terms.len() {
        return None;
    }

    let mut env = base.clone();
    let fixed_len = wildcard_pos.unwrap_or(pattern_terms.len());

    for (pterm, sterm) in pattern_terms.iter().take(fixed_len).zip(&statement.terms) {
        if !bind_one(pterm, sterm, &mut env) {
            return None;
        }
    }

    if let Some(pos) = wildcard_pos {
        let name = match &pattern_terms[pos] {
            Term::Wildcard(name) => name.clone(),
            _ => unreachable!("wildcard_pos only set for Term::Wildcard"),
        };
        let rest: Vec<String> = statement.terms[fixed_len..]
            .iter()
            .map(term_to_string)
            .collect();
        let value = Term::List(rest);
        if !bind_consistent(&name, value, &mut env) {
            return None;
        }
    }

    Some(env)
}

fn bind_one(pattern_term: &Term, statement_term: &Term, env: &mut Binding) -> bool {
    match pattern_term {
        Term::Const(expected) => matches!(statement_term, Term::Const(actual) if actual == expected),
        Term::Var(name) => bind_consistent(name, statement_term.clone(), env),
        Term::Wildcard(_) => false, // handled separately; never reaches here mid-loop
        Term::List(_) => false, // patterns never contain a List term
    }
}

fn bind_consistent(name: &str, value: Term, env: &mut Binding) -> bool {
    match env.get(name) {
        Some(existing) if *existing != value => false,
        Some(_) => true,
        None => {
            env.insert(name.to_string(), value);
            true
        }
    }
}

fn term_to_string(term: &Term) -> String {
    match term {
        Term::Const(s) => s.clone(),
        Term::List(items) => items.join(","),
        Term::Var(name) => format!("?{name}"),
        Term::Wildcard(name) => format!("*{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(verb: &str, terms: &[&str], negated: bool) -> Statement {
        Statement::new(
            verb,
            terms.iter().map(|t| Term::Const(t.to_string())).collect(),
            negated,
        )
    }

    #[test]
    fn const_pattern_matches_exact_statement() {
        let pattern = vec![Term::Const("socrates".into()), Term::Const("man".into())];
        let statement = fact("is", &["socrates", "man"], false);
        let env = unify_leaf("is", &pattern, false, &statement, &Binding::new()).unwrap();
        assert!(env.is_empty());
    }

    #[test]
    fn variable_binds_corresponding_term() {
        let pattern = vec![Term::Var("x".into()), Term::Const("man".into())];
        let statement = fact("is", &["socrates", "man"], false);
        let env = unify_leaf("is", &pattern, false, &statement, &Binding::new()).unwrap();
        assert_eq!(env.get("x"), Some(&Term::Const("socrates".into())));
    }

    #[test]
    fn repeated_variable_requires_consistency() {
        let pattern = vec![Term::Var("x".into()), Term::Var("x".into())];
        let same = fact("eq", &["a", "a"], false);
        let different = fact("eq", &["a", "b"], false);
        assert!(unify_leaf("eq", &pattern, false, &same, &Binding::new()).is_some());
        assert!(unify_leaf("eq", &pattern, false, &different, &Binding::new()).is_none());
    }

    #[test]
    fn mismatched_verb_or_negation_fails() {
        let pattern = vec![Term::Const("x".into())];
        let statement = fact("is", &["x"], false);
        assert!(unify_leaf("was", &pattern, false, &statement, &Binding::new()).is_none());
        assert!(unify_leaf("is", &pattern, true, &statement, &Binding::new()).is_none());
    }

    #[test]
    fn wildcard_binds_remaining_terms_as_list() {
        let pattern = vec![Term::Var("s".into()), Term::Wildcard("w".into())];
        let statement = fact("says", &["ravi", "hello", "world", "how", "are", "you"], false);
        let env = unify_leaf("says", &pattern, false, &statement, &Binding::new()).unwrap();
        assert_eq!(env.get("s"), Some(&Term::Const("ravi".into())));
        assert_eq!(
            env.get("w"),
            Some(&Term::List(vec![
                "hello".into(),
                "world".into(),
                "how".into(),
                "are".into(),
                "you".into()
            ]))
        );
    }

    #[test]
    fn wildcard_may_bind_empty_list() {
        let pattern = vec![Term::Var("s".into()), Term::Wildcard("w".into())];
        let statement = fact("says", &["ravi"], false);
        let env = unify_leaf("says", &pattern, false, &statement, &Binding::new()).unwrap();
        assert_eq!(env.get("w"), Some(&Term::List(vec![])));
    }

    #[test]
    fn wildcard_not_last_is_rejected() {
        let pattern = vec![Term::Wildcard("w".into()), Term::Const("tail".into())];
        let statement = fact("x", &["a", "b", "tail"], false);
        assert!(unify_leaf("x", &pattern, false, &statement, &Binding::new()).is_none());
    }

    #[test]
    fn term_count_mismatch_without_wildcard_fails() {
        let pattern = vec![Term::Const("a".into())];
        let statement = fact("x", &["a", "b"], false);
        assert!(unify_leaf("x", &pattern, false, &statement, &Binding::new()).is_none());
    }

    #[test]
    fn unify_extends_existing_base_binding() {
        let mut base = Binding::new();
        base.insert("x".to_string(), Term::Const("socrates".into()));
        let pattern = vec![Term::Var("x".into()), Term::Const("mortal".into())];
        let consistent = fact("is", &["socrates", "mortal"], false);
        let inconsistent = fact("is", &["plato", "mortal"], false);
        assert!(unify_leaf("is", &pattern, false, &consistent, &base).is_some());
        assert!(unify_leaf("is", &pattern, false, &inconsistent, &base).is_none());
    }
}
