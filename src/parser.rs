//! Textual ABNF reader (RFC 5234 notation, RFC 7405 literal prefixes,
//! and two commonly seen extensions: single-quoted case-sensitive
//! literals and `{...}` grouping, both refused under strict mode).
//!
//! The reader is line-oriented like the grammar notation itself: a
//! rule starts in column zero, continuation lines are indented, and
//! `;` comments run to end of line. Rule headers are spotted with a
//! regex; everything after the `=` goes through a hand scanner that
//! drives the tree-construction primitives.

use regex::Regex;

use crate::error::{GrammarError, Result};
use crate::expr::{CompoundKind, ExprKind, Expression, NumRange};
use crate::grammar::Grammar;

/// One rule's worth of raw text: the header line plus any indented
/// continuation lines, each tagged with its source line number.
struct RawRule<'a> {
    name: &'a str,
    incremental: bool,
    line: u32,
    pieces: Vec<(u32, &'a str)>,
}

/// Parse `text` as one grammar source and merge its rules into
/// `grammar`. Grammar-structural problems are recorded through the
/// reporter and parsing continues; only the error flood cutoff aborts.
pub(crate) fn parse_source(
    grammar: &mut Grammar,
    text: &str,
    name: &str,
    tentative: bool,
) -> Result<()> {
    grammar.begin_input(name, tentative);
    let header = Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*)[ \t]*=[ \t]*(/?)(.*)$").unwrap();
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut raw: Vec<RawRule> = Vec::new();
    for (idx, source_line) in text.lines().enumerate() {
        let line = idx as u32 + 1;
        let trimmed = source_line.trim();

        if source_line.starts_with([' ', '\t']) {
            // Continuation of the rule above; comment-only and blank
            // continuation lines are harmless, the scanner skips them.
            match raw.last_mut() {
                Some(rule) => rule.pieces.push((line, source_line)),
                None => {
                    if !trimmed.is_empty() && !trimmed.starts_with(';') {
                        report(grammar, name, line, "continuation line outside a rule")?;
                    }
                }
            }
            continue;
        }

        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }

        match header.captures(source_line) {
            Some(captures) => {
                let body = captures.get(3).map_or("", |m| m.as_str());
                raw.push(RawRule {
                    name: captures.get(1).map_or("", |m| m.as_str()),
                    incremental: &captures[2] == "/",
                    line,
                    pieces: vec![(line, body)],
                });
            }
            None => report(grammar, name, line, "expected a rule definition")?,
        }
    }

    for rule in raw {
        if rule.name.contains('_') && !grammar.config().underscore {
            report(
                grammar,
                name,
                rule.line,
                format!("underscore in rule name <{}>", rule.name),
            )?;
            continue;
        }
        match parse_rule_body(grammar, name, &rule) {
            Ok(expr) => register(grammar, name, &rule, expr)?,
            Err(err @ GrammarError::TooManyErrors) => return Err(err),
            Err(err) => grammar.reporter.report(err)?,
        }
    }

    Ok(())
}

fn report(grammar: &Grammar, file: &str, line: u32, message: impl Into<String>) -> Result<()> {
    grammar.reporter.report(GrammarError::Parse {
        file: file.to_string(),
        line,
        message: message.into(),
    })
}

fn parse_rule_body(grammar: &mut Grammar, file: &str, rule: &RawRule) -> Result<Expression> {
    let mut parser = RuleParser {
        grammar,
        scan: Scanner::new(&rule.pieces, rule.line),
        file,
    };
    let expr = parser.parse_alternation()?;
    parser.scan.skip_cwsp();
    if let Some(c) = parser.scan.peek() {
        return Err(parser.err(format!("unexpected '{}'", c as char)));
    }
    Ok(expr)
}

fn register(grammar: &mut Grammar, file: &str, rule: &RawRule, expr: Expression) -> Result<()> {
    let sym = grammar.symbols.intern_name(rule.name);
    let id = grammar.lookup_or_create(sym);

    // A real source quietly overrides a rule that only a tentative
    // source (core rules, -t files) defined so far.
    let nt = grammar.nonterminal(id);
    if nt.is_defined() && nt.tentative && !grammar.input_is_tentative() {
        grammar.clear_definition(id);
    }

    if grammar.nonterminal(id).is_defined() && !rule.incremental {
        report(
            grammar,
            file,
            rule.line,
            GrammarError::DuplicateDefinition(rule.name.to_ascii_lowercase()).to_string(),
        )?;
        // Still merged below so later checks see the whole grammar.
    }

    grammar.add_alternative(id, expr);
    grammar.mark_defined(id, rule.line);
    Ok(())
}

/// A compound with one child stands for that child; collapsing keeps
/// `1*3digit` a repetition rather than an alternation of a
/// concatenation of one.
fn collapse(expr: Expression) -> Expression {
    let single = matches!(
        &expr.kind,
        ExprKind::Alternation(children) | ExprKind::Concatenation(children)
            if children.len() == 1
    );
    if !single {
        return expr;
    }
    match expr.kind {
        ExprKind::Alternation(mut children) | ExprKind::Concatenation(mut children) => {
            match children.pop() {
                Some(child) => child,
                None => unreachable!("just checked for one child"),
            }
        }
        _ => unreachable!("just matched a compound"),
    }
}

/// Byte scanner over one rule's flattened body, tracking the source
/// line of every byte.
struct Scanner {
    bytes: Vec<u8>,
    lines: Vec<u32>,
    pos: usize,
    start_line: u32,
}

impl Scanner {
    fn new(pieces: &[(u32, &str)], start_line: u32) -> Self {
        let mut bytes = Vec::new();
        let mut lines = Vec::new();
        for &(line, text) in pieces {
            bytes.extend_from_slice(text.as_bytes());
            lines.resize(bytes.len(), line);
            bytes.push(b'\n');
            lines.push(line);
        }
        Scanner {
            bytes,
            lines,
            pos: 0,
            start_line,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn line(&self) -> u32 {
        let i = self.pos.min(self.lines.len().saturating_sub(1));
        self.lines.get(i).copied().unwrap_or(self.start_line)
    }

    /// Skip whitespace (newlines included, the body is one logical
    /// line) and `;` comments.
    fn skip_cwsp(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.pos += 1;
                }
                Some(b';') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return,
            }
        }
    }
}

struct RuleParser<'g, 'a> {
    grammar: &'g mut Grammar,
    scan: Scanner,
    file: &'a str,
}

impl RuleParser<'_, '_> {
    fn err(&self, message: impl Into<String>) -> GrammarError {
        GrammarError::Parse {
            file: self.file.to_string(),
            line: self.scan.line(),
            message: message.into(),
        }
    }

    fn parse_alternation(&mut self) -> Result<Expression> {
        let mut slot = None;
        loop {
            let item = self.parse_concatenation()?;
            self.grammar
                .compound_add(CompoundKind::Alternation, &mut slot, item);
            self.scan.skip_cwsp();
            if !self.scan.eat(b'/') {
                break;
            }
        }
        slot.map(collapse).ok_or_else(|| self.err("empty alternation"))
    }

    fn parse_concatenation(&mut self) -> Result<Expression> {
        let mut slot = None;
        loop {
            self.scan.skip_cwsp();
            match self.scan.peek() {
                None | Some(b'/' | b')' | b']' | b'}') => break,
                Some(_) => {}
            }
            let item = self.parse_repetition()?;
            self.grammar
                .compound_add(CompoundKind::Concatenation, &mut slot, item);
        }
        slot.map(collapse).ok_or_else(|| self.err("missing element"))
    }

    fn parse_repetition(&mut self) -> Result<Expression> {
        self.scan.skip_cwsp();
        let line = self.scan.line();
        let explicit_min = self.scan_number()?;

        if self.scan.eat(b'*') {
            let min = explicit_min.unwrap_or(0);
            let max = self.scan_number()?;
            if let Some(max) = max {
                if max < min {
                    return Err(self.err(format!(
                        "repetition maximum {max} is below minimum {min}"
                    )));
                }
            }
            let body = self.parse_element()?;
            return Ok(self.grammar.node(
                ExprKind::Repetition {
                    min,
                    max,
                    body: Box::new(body),
                },
                line,
            ));
        }

        if let Some(count) = explicit_min {
            let body = self.parse_element()?;
            return Ok(self.grammar.node(
                ExprKind::Repetition {
                    min: count,
                    max: Some(count),
                    body: Box::new(body),
                },
                line,
            ));
        }

        self.parse_element()
    }

    fn parse_element(&mut self) -> Result<Expression> {
        self.scan.skip_cwsp();
        let line = self.scan.line();
        match self.scan.peek() {
            None => Err(self.err("unexpected end of rule")),
            Some(b'(') => {
                self.scan.bump();
                let expr = self.parse_alternation()?;
                self.expect_close(b')')?;
                Ok(expr)
            }
            Some(b'{') => {
                if self.grammar.config().legal {
                    return Err(self.err("'{' grouping is not allowed in strict mode"));
                }
                self.scan.bump();
                let expr = self.parse_alternation()?;
                self.expect_close(b'}')?;
                Ok(expr)
            }
            Some(b'[') => {
                self.scan.bump();
                let expr = self.parse_alternation()?;
                self.expect_close(b']')?;
                Ok(self.grammar.node(
                    ExprKind::Repetition {
                        min: 0,
                        max: Some(1),
                        body: Box::new(expr),
                    },
                    line,
                ))
            }
            Some(b'"') => self.parse_quoted(b'"', false, line),
            Some(b'\'') => {
                if self.grammar.config().legal {
                    return Err(self.err("single-quoted literals are not allowed in strict mode"));
                }
                self.parse_quoted(b'\'', true, line)
            }
            Some(b'%') => self.parse_percent(line),
            Some(b'<') => {
                self.scan.bump();
                let mut content = String::new();
                loop {
                    match self.scan.bump() {
                        None | Some(b'\n') => return Err(self.err("unterminated <prose>")),
                        Some(b'>') => break,
                        Some(b) => content.push(b as char),
                    }
                }
                Ok(self.grammar.node(ExprKind::Prose(content), line))
            }
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.parse_rulename(line),
            Some(c) => Err(self.err(format!("unexpected '{}'", c as char))),
        }
    }

    fn expect_close(&mut self, close: u8) -> Result<()> {
        self.scan.skip_cwsp();
        if self.scan.eat(close) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{}'", close as char)))
        }
    }

    fn parse_quoted(&mut self, quote: u8, case_sensitive: bool, line: u32) -> Result<Expression> {
        self.scan.bump();
        let mut bytes = Vec::new();
        loop {
            match self.scan.bump() {
                None | Some(b'\n') => return Err(self.err("unterminated literal")),
                Some(b) if b == quote => break,
                Some(b) => bytes.push(b),
            }
        }
        Ok(self.grammar.node(
            ExprKind::Literal {
                bytes,
                case_sensitive,
            },
            line,
        ))
    }

    fn parse_percent(&mut self, line: u32) -> Result<Expression> {
        self.scan.bump();
        match self.scan.bump() {
            Some(prefix @ (b's' | b'i')) => {
                if !self.grammar.config().rfc7405 {
                    return Err(self.err("%s/%i literals need RFC 7405 support, which is off"));
                }
                if self.scan.peek() != Some(b'"') {
                    return Err(self.err(format!("expected '\"' after %{}", prefix as char)));
                }
                self.parse_quoted(b'"', prefix == b's', line)
            }
            Some(b'b') => self.parse_values(2, line),
            Some(b'd') => self.parse_values(10, line),
            Some(b'x') => self.parse_values(16, line),
            _ => Err(self.err("expected base (b, d, or x) after '%'")),
        }
    }

    fn parse_values(&mut self, base: u32, line: u32) -> Result<Expression> {
        let lo = self.scan_radix(base)?;
        let mut ranges = Vec::new();
        if self.scan.eat(b'-') {
            let hi = self.scan_radix(base)?;
            if hi < lo {
                return Err(self.err(format!("range upper bound {hi} is below {lo}")));
            }
            ranges.push(NumRange { lo, hi });
        } else {
            ranges.push(NumRange { lo, hi: lo });
            while self.scan.eat(b'.') {
                let value = self.scan_radix(base)?;
                ranges.push(NumRange { lo: value, hi: value });
            }
        }
        for range in &ranges {
            if range.hi > 0xFF {
                if range.hi > 0x10FFFF {
                    return Err(self.err(format!("value {:#x} is out of range", range.hi)));
                }
                if range.lo <= 0xDFFF && range.hi >= 0xD800 {
                    return Err(self.err("range covers surrogate code points"));
                }
            }
        }
        Ok(self.grammar.node(ExprKind::Values(ranges), line))
    }

    /// Optional run of decimal digits, e.g. a repetition bound.
    fn scan_number(&mut self) -> Result<Option<u32>> {
        if !self.scan.peek().is_some_and(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        self.scan_radix(10).map(Some)
    }

    fn scan_radix(&mut self, base: u32) -> Result<u32> {
        let mut value: u32 = 0;
        let mut any = false;
        while let Some(b) = self.scan.peek() {
            let Some(digit) = (b as char).to_digit(base) else {
                break;
            };
            self.scan.bump();
            any = true;
            value = value
                .checked_mul(base)
                .and_then(|v| v.checked_add(digit))
                .ok_or_else(|| self.err("number is too large"))?;
        }
        if !any {
            return Err(self.err(format!("expected a base-{base} number")));
        }
        Ok(value)
    }

    fn parse_rulename(&mut self, line: u32) -> Result<Expression> {
        let mut name = String::new();
        while let Some(b) = self.scan.peek() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                name.push(b as char);
                self.scan.bump();
            } else {
                break;
            }
        }
        if name.contains('_') && !self.grammar.config().underscore {
            return Err(self.err(format!("underscore in rule name <{name}>")));
        }
        let sym = self.grammar.symbols.intern_name(&name);
        let id = self.grammar.lookup_or_create(sym);
        self.grammar.mark_referenced(id, line);
        Ok(self.grammar.node(ExprKind::Rule(sym), line))
    }
}
