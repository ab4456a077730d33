use std::fs::File;
use std::io::Write;

use pretty_assertions::assert_eq;
use regex::Regex;

use abnf_gen::{Generator, Grammar, GrammarError, ERROR_LIMIT};

fn grammar_from(source: &str) -> Grammar {
    let mut grammar = Grammar::default();
    grammar.preload_core().unwrap();
    grammar.add_source(source, "test", false).unwrap();
    grammar.check().unwrap();
    assert!(grammar.reporter.ok(), "grammar reported errors");
    grammar
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("greeting.abnf");
    {
        let mut file = File::create(&path).unwrap();
        file.write_all(b"start = %s\"Hello, \" name\nname = %s\"world\" / %s\"Rust\"\n")
            .unwrap();
    }

    let grammar = Grammar::from_file(&path).unwrap();
    let mut generator = Generator::new(&grammar, 5);
    for _ in 0..10 {
        let case = String::from_utf8(generator.generate().unwrap()).unwrap();
        assert!(
            case == "Hello, world" || case == "Hello, Rust",
            "unexpected case {case:?}"
        );
    }
}

#[test]
fn test_same_seed_reproduces_the_whole_batch() {
    let source = "token = 1*10alpha \"-\" 1*4digit\n";

    let mut batches = Vec::new();
    for _ in 0..2 {
        let grammar = grammar_from(source);
        let mut generator = Generator::new(&grammar, 1234);
        let mut batch = Vec::new();
        for _ in 0..20 {
            batch.push(generator.generate().unwrap());
        }
        batches.push(batch);
    }

    assert_eq!(batches[0], batches[1]);
}

#[test]
fn test_different_seeds_diverge() {
    let source = "token = 8*16(alpha / digit)\n";
    let grammar = grammar_from(source);

    let mut a = Generator::new(&grammar, 1);
    let mut b = Generator::new(&grammar, 2);
    let batch_a: Vec<_> = (0..10).map(|_| a.generate().unwrap()).collect();
    let batch_b: Vec<_> = (0..10).map(|_| b.generate().unwrap()).collect();

    assert_ne!(batch_a, batch_b);
}

#[test]
fn test_cases_match_the_grammar_they_came_from() {
    let grammar = grammar_from(
        "address = octet \".\" octet \".\" octet \".\" octet\noctet = 1*3digit\n",
    );
    let shape = Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").unwrap();

    let mut generator = Generator::new(&grammar, 77);
    for _ in 0..50 {
        let case = String::from_utf8(generator.generate().unwrap()).unwrap();
        assert!(shape.is_match(&case), "malformed case {case:?}");
    }
}

#[test]
fn test_full_coverage_exercises_every_alternative() {
    let grammar =
        grammar_from("verb = %s\"GET\" / %s\"PUT\" / %s\"POST\" / %s\"DELETE\"\n");

    let mut generator = Generator::new(&grammar, 9).full_coverage(true);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..4 {
        seen.insert(generator.generate().unwrap());
    }

    assert_eq!(seen.len(), 4);
}

#[test]
fn test_incremental_alternatives_merge() {
    let grammar = grammar_from("start = %s\"a\"\nstart =/ %s\"b\"\n");

    let mut generator = Generator::new(&grammar, 3).full_coverage(true);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..2 {
        seen.insert(generator.generate().unwrap());
    }

    assert_eq!(seen.len(), 2);
}

#[test]
fn test_rule_names_resolve_case_insensitively() {
    let grammar = grammar_from("START = FOO\nFoo = %s\"x\"\n");
    let mut generator = Generator::new(&grammar, 4);
    assert_eq!(generator.generate().unwrap(), b"x");
}

#[test]
fn test_real_input_overrides_a_core_rule() {
    // DIGIT comes preloaded; a real definition silently replaces it.
    let grammar = grammar_from("start = digit\ndigit = %s\"7\"\n");
    let mut generator = Generator::new(&grammar, 6);
    for _ in 0..5 {
        assert_eq!(generator.generate().unwrap(), b"7");
    }
}

#[test]
fn test_error_flood_is_capped() {
    let mut source = String::from("start = ");
    for i in 0..30 {
        source.push_str(&format!("m{i} "));
    }
    source.push('\n');

    let mut grammar = Grammar::default();
    grammar.add_source(&source, "test", false).unwrap();
    let outcome = grammar.check();

    assert!(matches!(outcome, Err(GrammarError::TooManyErrors)));
    assert_eq!(grammar.reporter.error_count(), ERROR_LIMIT);
}

#[test]
fn test_deep_recursion_stays_bounded() {
    let grammar = grammar_from(
        "expr = term / expr %s\"+\" term\nterm = digit / %s\"(\" expr %s\")\"\n",
    );

    let mut generator = Generator::new(&grammar, 31).depth(30);
    for _ in 0..100 {
        let case = String::from_utf8(generator.generate().unwrap()).unwrap();
        assert!(!case.is_empty());
        assert_eq!(case.matches('(').count(), case.matches(')').count());
    }
}

#[test]
fn test_broken_grammar_refuses_generation() {
    let mut grammar = Grammar::default();
    grammar.preload_core().unwrap();
    grammar
        .add_source("start = nowhere\n", "test", false)
        .unwrap();
    grammar.check().unwrap();
    assert!(!grammar.reporter.ok());

    let mut generator = Generator::new(&grammar, 8);
    assert!(matches!(
        generator.generate(),
        Err(GrammarError::ErrorsRecorded(_))
    ));
}
