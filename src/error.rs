use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::io;
use thiserror::Error;

use crate::symbol::Symbol;

/// Custom error types for the ABNF generator
#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: u32,
        message: String,
    },

    #[error("undefined nonterminal <{0}>")]
    UndefinedNonTerminal(String),

    #[error("rule <{0}> is defined twice")]
    DuplicateDefinition(String),

    #[error("rule <{0}> can never derive a finite string")]
    NeverTerminates(String),

    #[error("no start symbol: no rule is defined outside tentative input")]
    NoStartSymbol,

    #[error("too many errors; abort")]
    TooManyErrors,

    #[error("grammar has {0} recorded error(s); refusing to generate")]
    ErrorsRecorded(u32),
}

/// Result type for grammar operations
pub type Result<T> = std::result::Result<T, GrammarError>;

/// How many distinct errors are reported before the run is cut off.
pub const ERROR_LIMIT: u32 = 15;

/// The single reporting surface every diagnostic goes through.
///
/// Errors are printed to stderr and counted; once more than
/// [`ERROR_LIMIT`] have been recorded the next report aborts the run
/// with [`GrammarError::TooManyErrors`]. Notes are printed but never
/// counted. Interior mutability keeps reporting available behind a
/// shared `Grammar` reference (the run is single-threaded throughout).
#[derive(Debug, Default)]
pub struct Reporter {
    errors: Cell<u32>,
    complained: RefCell<HashSet<Symbol>>,
}

impl Reporter {
    pub fn new() -> Self {
        Reporter::default()
    }

    /// Number of errors recorded so far.
    pub fn error_count(&self) -> u32 {
        self.errors.get()
    }

    /// True when no error has been recorded.
    pub fn ok(&self) -> bool {
        self.errors.get() == 0
    }

    /// Record and print one error.
    pub fn report(&self, message: impl std::fmt::Display) -> Result<()> {
        if self.errors.get() >= ERROR_LIMIT {
            eprintln!("Too many errors; abort.");
            return Err(GrammarError::TooManyErrors);
        }
        self.errors.set(self.errors.get() + 1);
        eprintln!("{message}");
        Ok(())
    }

    /// Print an informational note without counting it as an error.
    pub fn note(&self, message: impl std::fmt::Display) {
        eprintln!("note: {message}");
    }

    /// Record an error about `name` unless one was already recorded for
    /// it, so a rule that is referenced many times is complained about
    /// once.
    pub fn report_once(&self, name: Symbol, message: impl std::fmt::Display) -> Result<()> {
        if !self.complained.borrow_mut().insert(name) {
            return Ok(());
        }
        self.report(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    #[test]
    fn test_error_cap() {
        let reporter = Reporter::new();
        for i in 0..ERROR_LIMIT {
            assert!(reporter.report(format!("error {i}")).is_ok());
        }
        assert_eq!(reporter.error_count(), ERROR_LIMIT);
        assert!(matches!(
            reporter.report("one too many"),
            Err(GrammarError::TooManyErrors)
        ));
        // The count stops at the cap.
        assert_eq!(reporter.error_count(), ERROR_LIMIT);
    }

    #[test]
    fn test_diagnostic_wording() {
        assert_eq!(
            GrammarError::DuplicateDefinition("r".to_string()).to_string(),
            "rule <r> is defined twice"
        );
        assert_eq!(
            GrammarError::NeverTerminates("loop".to_string()).to_string(),
            "rule <loop> can never derive a finite string"
        );
    }

    #[test]
    fn test_notes_are_not_counted() {
        let reporter = Reporter::new();
        reporter.note("just so you know");
        assert!(reporter.ok());
    }

    #[test]
    fn test_report_once_deduplicates() {
        let mut symbols = SymbolTable::new();
        let name = symbols.intern(b"loop");
        let reporter = Reporter::new();
        reporter.report_once(name, "broken rule").unwrap();
        reporter.report_once(name, "broken rule").unwrap();
        assert_eq!(reporter.error_count(), 1);
    }
}
