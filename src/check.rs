//! Consistency checking: reference resolution, prose rejection, and
//! the minimal-derivation distance computation the generator relies on
//! to stay terminating.

use std::collections::HashMap;

use crate::error::{GrammarError, Result};
use crate::expr::{Distance, ExprKind, Expression};
use crate::grammar::Grammar;
use crate::symbol::Symbol;

/// Walk every registered nonterminal, report structural problems, and
/// annotate every tree node with its distance.
///
/// Errors accumulate through the grammar's reporter; only the error
/// flood cutoff (or an I/O failure inside the reporter) aborts early.
pub fn check(grammar: &mut Grammar) -> Result<()> {
    check_references(grammar)?;
    compute_distances(grammar);
    check_termination(grammar)?;
    Ok(())
}

fn location(grammar: &Grammar, site: Option<(Symbol, u32)>) -> String {
    match site {
        Some((file, line)) => format!("{}:{}: ", grammar.symbols.display(file), line),
        None => String::new(),
    }
}

fn check_references(grammar: &Grammar) -> Result<()> {
    let start = grammar.start_symbol();

    for id in grammar.ids() {
        let nt = grammar.nonterminal(id);
        let name = grammar.symbols.display(nt.name());

        if nt.is_referenced() && !nt.is_defined() {
            let loc = location(grammar, nt.ref_site);
            grammar
                .reporter
                .report_once(nt.name(), format!("{loc}undefined nonterminal <{name}>"))?;
        } else if nt.is_defined()
            && !nt.is_referenced()
            && !nt.tentative
            && start != Some(nt.name())
        {
            let loc = location(grammar, nt.def_site);
            grammar
                .reporter
                .note(format!("{loc}rule <{name}> is defined but never used"));
        }

        if !grammar.config().allow_prose {
            if let Some(expr) = nt.expression() {
                if let Some((file, line)) = find_prose(expr) {
                    let loc = location(grammar, Some((file, line)));
                    grammar
                        .reporter
                        .report(format!("{loc}rule <{name}> contains prose"))?;
                }
            }
        }
    }

    match start {
        None => grammar
            .reporter
            .report("no start symbol: no rule is defined outside tentative input")?,
        Some(sym) => {
            let defined = grammar
                .lookup(sym)
                .is_some_and(|id| grammar.nonterminal(id).is_defined());
            if !defined {
                let name = grammar.symbols.display(sym);
                grammar
                    .reporter
                    .report_once(sym, format!("start symbol <{name}> is not defined"))?;
            }
        }
    }

    Ok(())
}

fn find_prose(expr: &Expression) -> Option<(Symbol, u32)> {
    match &expr.kind {
        ExprKind::Prose(_) => Some((expr.file, expr.line)),
        ExprKind::Alternation(children) | ExprKind::Concatenation(children) => {
            children.iter().find_map(find_prose)
        }
        ExprKind::Repetition { body, .. } => find_prose(body),
        ExprKind::Literal { .. } | ExprKind::Values(_) | ExprKind::Rule(_) => None,
    }
}

/// Relax per-rule distances to a fixpoint, annotating every node on
/// the way. Rules that never reach a finite distance are structurally
/// unable to terminate.
fn compute_distances(grammar: &mut Grammar) {
    let ids: Vec<_> = grammar.ids().collect();
    let mut dist = vec![Distance::Infinite; ids.len()];
    let pos: HashMap<Symbol, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (grammar.nonterminal(id).name(), i))
        .collect();

    loop {
        let mut changed = false;
        let current = dist.clone();
        let lookup = |sym: Symbol| match pos.get(&sym) {
            Some(&j) => current[j],
            None => Distance::Infinite,
        };
        for (i, &id) in ids.iter().enumerate() {
            let nt = grammar.nonterminal_mut(id);
            let Some(expr) = nt.expr.as_mut() else {
                continue;
            };
            let d = annotate(expr, &lookup);
            if d.key() < dist[i].key() {
                dist[i] = d;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for (i, &id) in ids.iter().enumerate() {
        grammar.nonterminal_mut(id).distance = dist[i];
    }
}

/// Compute and store the distance of `expr` and all its descendants.
fn annotate(expr: &mut Expression, lookup: &dyn Fn(Symbol) -> Distance) -> Distance {
    let d = match &mut expr.kind {
        ExprKind::Literal { .. } | ExprKind::Values(_) | ExprKind::Prose(_) => Distance::Finite(0),
        ExprKind::Rule(sym) => lookup(*sym).plus(Distance::Finite(1)),
        ExprKind::Alternation(children) => children
            .iter_mut()
            .map(|child| annotate(child, lookup))
            .fold(Distance::Infinite, Distance::or_min),
        ExprKind::Concatenation(children) => children
            .iter_mut()
            .fold(Distance::Finite(0), |acc, child| {
                acc.plus(annotate(child, lookup))
            }),
        ExprKind::Repetition { min, body, .. } => {
            let body_distance = annotate(body, lookup);
            body_distance.scaled(u64::from(*min))
        }
    };
    expr.distance = d;
    d
}

fn check_termination(grammar: &Grammar) -> Result<()> {
    for id in grammar.ids() {
        let nt = grammar.nonterminal(id);
        if nt.expression().is_none() || nt.distance().is_finite() {
            continue;
        }
        let reachable = nt.is_referenced() || grammar.start_symbol() == Some(nt.name());
        if reachable {
            let name = grammar.symbols.display(nt.name());
            let loc = location(grammar, nt.def_site);
            grammar
                .reporter
                .report_once(nt.name(), format!("{loc}{}", GrammarError::NeverTerminates(name)))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarConfig;

    #[test]
    fn test_terminal_rules_have_zero_distance() {
        let mut grammar = Grammar::default();
        grammar
            .add_source("start = \"a\" / %x41-43\n", "test", false)
            .unwrap();
        grammar.check().unwrap();
        let id = grammar.start_id().unwrap();
        assert_eq!(grammar.nonterminal(id).distance(), Distance::Finite(0));
        assert!(grammar.reporter.ok());
    }

    #[test]
    fn test_reference_adds_one_step() {
        let mut grammar = Grammar::default();
        grammar
            .add_source("start = a\na = b\nb = \"x\"\n", "test", false)
            .unwrap();
        grammar.check().unwrap();
        let id = grammar.start_id().unwrap();
        assert_eq!(grammar.nonterminal(id).distance(), Distance::Finite(2));
    }

    #[test]
    fn test_recursion_with_escape_is_finite() {
        let mut grammar = Grammar::default();
        grammar
            .add_source("expr = \"x\" / \"(\" expr \")\"\n", "test", false)
            .unwrap();
        grammar.check().unwrap();
        let id = grammar.start_id().unwrap();
        assert_eq!(grammar.nonterminal(id).distance(), Distance::Finite(0));
        assert!(grammar.reporter.ok());
    }

    #[test]
    fn test_recursion_without_escape_is_an_error() {
        let mut grammar = Grammar::default();
        grammar
            .add_source("start = loop\nloop = \"x\" loop\n", "test", false)
            .unwrap();
        grammar.check().unwrap();
        assert!(!grammar.reporter.ok());
    }

    #[test]
    fn test_infinite_rule_complained_about_once() {
        let mut grammar = Grammar::default();
        grammar
            .add_source(
                "start = loop loop loop\nloop = \"x\" loop\n",
                "test",
                false,
            )
            .unwrap();
        grammar.check().unwrap();
        // One complaint for <loop> and one for <start>, which inherits
        // the infinite distance.
        assert_eq!(grammar.reporter.error_count(), 2);
    }

    #[test]
    fn test_undefined_reference_is_reported() {
        let mut grammar = Grammar::default();
        grammar
            .add_source("start = missing\n", "test", false)
            .unwrap();
        grammar.check().unwrap();
        assert_eq!(grammar.reporter.error_count(), 2);
    }

    #[test]
    fn test_zero_min_repetition_of_infinite_body_is_fine() {
        let mut grammar = Grammar::default();
        grammar
            .add_source("start = \"a\" *loop\nloop = \"x\" loop\n", "test", false)
            .unwrap();
        grammar.check().unwrap();
        // <loop> itself is broken, and that is reported, but <start>
        // still has a finite distance through zero repetitions.
        let id = grammar.start_id().unwrap();
        assert!(grammar.nonterminal(id).distance().is_finite());
        assert_eq!(grammar.reporter.error_count(), 1);
    }

    #[test]
    fn test_prose_rejected_when_disallowed() {
        let mut grammar = Grammar::new(GrammarConfig {
            allow_prose: false,
            ..GrammarConfig::default()
        });
        grammar
            .add_source("start = <some prose here>\n", "test", false)
            .unwrap();
        grammar.check().unwrap();
        assert!(!grammar.reporter.ok());
    }

    #[test]
    fn test_case_insensitive_references_resolve() {
        let mut grammar = Grammar::default();
        grammar
            .add_source("start = FOO\nfoo = \"x\"\n", "test", false)
            .unwrap();
        grammar.check().unwrap();
        assert!(grammar.reporter.ok());
    }
}
