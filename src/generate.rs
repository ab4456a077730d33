//! Depth-bounded random derivation of sample strings from a checked
//! grammar, with optional full-coverage steering.

use std::collections::HashMap;
use std::io::{self, Write};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{GrammarError, Result};
use crate::expr::{Distance, ExprKind, Expression, NodeId};
use crate::grammar::{Grammar, NtId};

/// Default recursion-depth budget per generated case.
pub const DEFAULT_DEPTH: u32 = 100;

/// An unbounded repetition generates at most `(min + 1)` times this
/// factor, to keep output finite.
const UNBOUNDED_REPEAT_FACTOR: u32 = 4;

/// Which boundary counts of a repetition have been produced so far.
#[derive(Debug, Default)]
struct RepRecord {
    lo: bool,
    interior: bool,
    hi: bool,
}

/// Coverage bookkeeping, keyed by node id and shared across all cases
/// of a run so a batch can exercise every branch at least once.
#[derive(Debug, Default)]
struct Coverage {
    alternatives: HashMap<NodeId, Vec<bool>>,
    repetitions: HashMap<NodeId, RepRecord>,
}

/// Derives random samples from a grammar.
///
/// One generator holds one seeded random source; consecutive cases
/// keep drawing from it, so the whole sequence of a run is what is
/// reproducible under a fixed seed, not any single case. Full-coverage
/// mode perturbs the draw sequence, so an explicit seed only
/// reproduces non-coverage output.
pub struct Generator<'g> {
    grammar: &'g Grammar,
    rng: StdRng,
    depth: u32,
    full_coverage: bool,
    verbose: bool,
    level: usize,
    coverage: Coverage,
}

impl<'g> Generator<'g> {
    pub fn new(grammar: &'g Grammar, seed: u64) -> Self {
        Generator {
            grammar,
            rng: StdRng::seed_from_u64(seed),
            depth: DEFAULT_DEPTH,
            full_coverage: false,
            verbose: false,
            level: 0,
            coverage: Coverage::default(),
        }
    }

    /// Set the recursion-depth budget per case.
    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Prefer unexercised alternatives and repetition boundaries so a
    /// batch of cases covers every branch at least once.
    pub fn full_coverage(mut self, on: bool) -> Self {
        self.full_coverage = on;
        self
    }

    /// Trace rule entry and exit to stderr.
    pub fn verbose(mut self, on: bool) -> Self {
        self.verbose = on;
        self
    }

    /// Generate one case into `out`.
    ///
    /// Refuses to run when the grammar has recorded errors; partial
    /// output from a broken grammar is never worth anything.
    pub fn generate_to(&mut self, out: &mut dyn Write) -> Result<()> {
        if !self.grammar.reporter.ok() {
            return Err(GrammarError::ErrorsRecorded(
                self.grammar.reporter.error_count(),
            ));
        }
        let start = self.grammar.start_id().ok_or(GrammarError::NoStartSymbol)?;
        self.derive_rule(start, self.depth, out)
    }

    /// Generate one case into a fresh byte buffer.
    pub fn generate(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.generate_to(&mut buf)?;
        Ok(buf)
    }

    fn derive_rule(&mut self, id: NtId, depth: u32, out: &mut dyn Write) -> Result<()> {
        if self.verbose {
            eprintln!("{:indent$}-> {}", "", self.grammar.name_of(id), indent = 2 * self.level);
        }
        let nt = self.grammar.nonterminal(id);
        let Some(expr) = nt.expression() else {
            return Err(GrammarError::UndefinedNonTerminal(self.grammar.name_of(id)));
        };
        self.level += 1;
        let result = self.derive(expr, depth, out);
        self.level -= 1;
        if self.verbose {
            eprintln!("{:indent$}<- {}", "", self.grammar.name_of(id), indent = 2 * self.level);
        }
        result
    }

    fn derive(&mut self, expr: &Expression, depth: u32, out: &mut dyn Write) -> Result<()> {
        match &expr.kind {
            ExprKind::Literal {
                bytes,
                case_sensitive,
            } => {
                if *case_sensitive {
                    out.write_all(bytes)?;
                } else {
                    // Pick a concrete case rendering per emission.
                    let mut rendered = bytes.clone();
                    for b in &mut rendered {
                        if b.is_ascii_alphabetic() {
                            *b = if self.rng.gen_bool(0.5) {
                                b.to_ascii_uppercase()
                            } else {
                                b.to_ascii_lowercase()
                            };
                        }
                    }
                    out.write_all(&rendered)?;
                }
                Ok(())
            }
            ExprKind::Values(ranges) => {
                for range in ranges {
                    let value = if range.lo == range.hi {
                        range.lo
                    } else {
                        self.rng.gen_range(range.lo..=range.hi)
                    };
                    emit_value(out, value)?;
                }
                Ok(())
            }
            ExprKind::Prose(content) => {
                out.write_all(content.as_bytes())?;
                Ok(())
            }
            ExprKind::Rule(sym) => {
                let id = self
                    .grammar
                    .lookup(*sym)
                    .ok_or_else(|| GrammarError::UndefinedNonTerminal(self.grammar.symbols.display(*sym)))?;
                self.derive_rule(id, depth.saturating_sub(1), out)
            }
            ExprKind::Alternation(children) => {
                let pick = self.choose_alternative(expr.id, children, depth);
                self.derive(&children[pick], depth, out)
            }
            ExprKind::Concatenation(children) => {
                for child in children {
                    self.derive(child, depth, out)?;
                }
                Ok(())
            }
            ExprKind::Repetition { min, max, body } => {
                let count = self.choose_repeat(expr.id, *min, *max, body.distance, depth);
                for _ in 0..count {
                    self.derive(body, depth, out)?;
                }
                Ok(())
            }
        }
    }

    /// Pick one alternative. Children whose distance fits the budget
    /// are chosen among uniformly; with the budget exhausted the
    /// cheapest child wins, ties going to declaration order. Coverage
    /// mode prefers a fitting, not-yet-exercised child first.
    fn choose_alternative(&mut self, node: NodeId, children: &[Expression], depth: u32) -> usize {
        if self.full_coverage {
            let record = self
                .coverage
                .alternatives
                .entry(node)
                .or_insert_with(|| vec![false; children.len()]);
            let pending: Vec<usize> = (0..children.len())
                .filter(|&i| !record[i] && children[i].distance.fits(depth))
                .collect();
            if !pending.is_empty() {
                let pick = pending[self.rng.gen_range(0..pending.len())];
                record[pick] = true;
                return pick;
            }
        }

        let fitting: Vec<usize> = (0..children.len())
            .filter(|&i| children[i].distance.fits(depth))
            .collect();
        let pick = if fitting.is_empty() {
            (0..children.len())
                .min_by_key(|&i| children[i].distance.key())
                .unwrap_or(0)
        } else {
            fitting[self.rng.gen_range(0..fitting.len())]
        };

        if self.full_coverage {
            if let Some(record) = self.coverage.alternatives.get_mut(&node) {
                record[pick] = true;
            }
        }
        pick
    }

    /// Pick a repetition count in `[min, max]`, capped by how many
    /// body derivations the remaining budget can still pay for.
    /// Coverage mode produces the boundary counts (`min`, `max`, one
    /// interior value) before drawing randomly.
    fn choose_repeat(
        &mut self,
        node: NodeId,
        min: u32,
        max: Option<u32>,
        body_distance: Distance,
        depth: u32,
    ) -> u32 {
        let hi = max
            .unwrap_or_else(|| min.saturating_add(1).saturating_mul(UNBOUNDED_REPEAT_FACTOR))
            .max(min);
        let cap = match body_distance {
            Distance::Finite(0) => hi,
            Distance::Finite(d) => {
                let extra = (u64::from(depth) / d).min(u64::from(hi - min)) as u32;
                min + extra
            }
            // The checker only lets a non-terminating body through
            // when zero repetitions are allowed.
            Distance::Unknown | Distance::Infinite => min,
        };

        if self.full_coverage {
            let record = self.coverage.repetitions.entry(node).or_default();
            let mut targets: Vec<u32> = Vec::new();
            if !record.lo {
                targets.push(min);
            }
            if hi > min && !record.hi {
                targets.push(hi);
            }
            let interior = min.saturating_add(1);
            if hi > interior && !record.interior {
                targets.push(interior);
            }
            if let Some(&count) = targets.iter().find(|&&count| count <= cap) {
                mark_repeat(record, count, min, hi);
                return count;
            }
        }

        let count = if cap <= min {
            min
        } else {
            self.rng.gen_range(min..=cap)
        };
        if self.full_coverage {
            if let Some(record) = self.coverage.repetitions.get_mut(&node) {
                mark_repeat(record, count, min, hi);
            }
        }
        count
    }
}

fn mark_repeat(record: &mut RepRecord, count: u32, min: u32, hi: u32) {
    if count == min {
        record.lo = true;
    }
    if count == hi && hi > min {
        record.hi = true;
    }
    let interior = min.saturating_add(1);
    if count == interior && hi > interior {
        record.interior = true;
    }
}

fn emit_value(out: &mut dyn Write, value: u32) -> io::Result<()> {
    if value <= 0xFF {
        out.write_all(&[value as u8])
    } else {
        // Parsing rejects values that are not scalar values.
        let c = char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER);
        let mut buf = [0u8; 4];
        out.write_all(c.encode_utf8(&mut buf).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarConfig;

    fn checked(source: &str) -> Grammar {
        let mut grammar = Grammar::new(GrammarConfig::default());
        grammar.preload_core().unwrap();
        grammar.add_source(source, "test", false).unwrap();
        grammar.check().unwrap();
        assert!(grammar.reporter.ok(), "unexpected grammar errors");
        grammar
    }

    #[test]
    fn test_literal_and_bounded_repetition() {
        let grammar = checked("start = \"a\" *2\"b\"\n");
        let mut generator = Generator::new(&grammar, 7);
        for _ in 0..5 {
            let case = generator.generate().unwrap();
            let text = String::from_utf8(case).unwrap().to_ascii_lowercase();
            assert!(
                ["a", "ab", "abb"].contains(&text.as_str()),
                "unexpected case {text:?}"
            );
        }
    }

    #[test]
    fn test_numeric_range_values() {
        let grammar = checked("start = %x41-43\n");
        let mut generator = Generator::new(&grammar, 99);
        for _ in 0..20 {
            let case = generator.generate().unwrap();
            assert_eq!(case.len(), 1);
            assert!((b'A'..=b'C').contains(&case[0]), "got {:?}", case[0]);
        }
    }

    #[test]
    fn test_fixed_seed_reproduces_the_sequence() {
        let source = "start = 1*8digit \"-\" 1*8alpha\n";
        let grammar = checked(source);

        let mut first = Vec::new();
        let mut generator = Generator::new(&grammar, 42);
        for _ in 0..10 {
            first.push(generator.generate().unwrap());
        }

        let grammar = checked(source);
        let mut second = Vec::new();
        let mut generator = Generator::new(&grammar, 42);
        for _ in 0..10 {
            second.push(generator.generate().unwrap());
        }

        assert_eq!(first, second);
    }

    #[test]
    fn test_case_sensitive_literal_is_verbatim() {
        let grammar = checked("start = %s\"MiXeD\"\n");
        let mut generator = Generator::new(&grammar, 1);
        for _ in 0..5 {
            assert_eq!(generator.generate().unwrap(), b"MiXeD");
        }
    }

    #[test]
    fn test_recursive_grammar_terminates_on_zero_budget() {
        let grammar = checked("expr = %s\"x\" / %s\"(\" expr %s\")\"\n");
        let mut generator = Generator::new(&grammar, 5).depth(0);
        // With no budget the only fitting alternative is the terminal.
        assert_eq!(generator.generate().unwrap(), b"x");
    }

    #[test]
    fn test_recursive_grammar_terminates_with_budget() {
        let grammar = checked("expr = %s\"x\" / %s\"(\" expr %s\")\"\n");
        let mut generator = Generator::new(&grammar, 5).depth(20);
        for _ in 0..50 {
            let case = generator.generate().unwrap();
            let text = String::from_utf8(case).unwrap();
            let opens = text.matches('(').count();
            assert_eq!(opens, text.matches(')').count());
            assert!(text.contains('x'));
        }
    }

    #[test]
    fn test_full_coverage_hits_every_alternative() {
        let grammar = checked("start = \"1\" / \"2\" / \"3\"\n");
        let mut generator = Generator::new(&grammar, 11).full_coverage(true);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(generator.generate().unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_full_coverage_hits_repetition_boundaries() {
        let grammar = checked("start = %s\"a\" *2%s\"b\"\n");
        let mut generator = Generator::new(&grammar, 23).full_coverage(true);
        let mut lengths = std::collections::HashSet::new();
        for _ in 0..3 {
            let case = generator.generate().unwrap();
            assert_eq!(case[0], b'a');
            lengths.insert(case.len() - 1);
        }
        // min, max, and the interior count all appear.
        assert_eq!(lengths, [0usize, 1, 2].into_iter().collect());
    }

    #[test]
    fn test_refuses_to_generate_from_broken_grammar() {
        let mut grammar = Grammar::default();
        grammar
            .add_source("start = missing\n", "test", false)
            .unwrap();
        grammar.check().unwrap();
        assert!(!grammar.reporter.ok());
        let mut generator = Generator::new(&grammar, 3);
        assert!(matches!(
            generator.generate(),
            Err(GrammarError::ErrorsRecorded(_))
        ));
    }

    #[test]
    fn test_unbounded_repetition_stays_finite() {
        let grammar = checked("start = *\"x\"\n");
        let mut generator = Generator::new(&grammar, 17);
        for _ in 0..20 {
            let case = generator.generate().unwrap();
            assert!(case.len() <= UNBOUNDED_REPEAT_FACTOR as usize);
        }
    }

    #[test]
    fn test_huge_repetition_minimum_does_not_overflow() {
        let grammar = checked("start = %s\"x\"\n");
        let id = grammar.start_id().unwrap();
        let node = grammar.nonterminal(id).expression().unwrap().id;
        let mut generator = Generator::new(&grammar, 1).full_coverage(true);
        // A minimum of u32::MAX leaves no room above it; the count
        // must come back saturated, not wrapped.
        let count = generator.choose_repeat(node, u32::MAX, None, Distance::Finite(0), 100);
        assert_eq!(count, u32::MAX);
    }

    #[test]
    fn test_prose_renders_verbatim() {
        let grammar = checked("start = <anything>\n");
        let mut generator = Generator::new(&grammar, 2);
        assert_eq!(generator.generate().unwrap(), b"anything");
    }
}
