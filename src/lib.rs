//! abnf-gen parses ABNF grammars (RFC 5234, with the RFC 7405 literal
//! prefixes) and generates random test cases from them.
//!
//! A [`Grammar`] collects rules from one or more sources, resolves
//! references case-insensitively, and checks that every reachable rule
//! can derive a finite string. A [`Generator`] then derives samples
//! under a recursion-depth budget, optionally steering a batch of
//! cases so every alternative and repetition boundary is exercised at
//! least once.
//!
//! # Example
//!
//! ```rust
//! use abnf_gen::{Generator, Grammar};
//!
//! let mut grammar = Grammar::default();
//! grammar.add_source("start = %s\"a\" *2%s\"b\"\n", "doc", false)?;
//! grammar.check()?;
//!
//! let mut generator = Generator::new(&grammar, 1);
//! let case = String::from_utf8(generator.generate()?)?;
//! assert!(["a", "ab", "abb"].contains(&case.as_str()));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod check;
pub mod error;
pub mod expr;
pub mod generate;
pub mod grammar;
pub mod parser;
pub mod symbol;

pub use error::{GrammarError, Reporter, Result, ERROR_LIMIT};
pub use expr::{Distance, ExprKind, Expression, NumRange};
pub use generate::{Generator, DEFAULT_DEPTH};
pub use grammar::{Grammar, GrammarConfig, Nonterminal, CORE_GRAMMAR_NAME, RFC_5234_CORE};
pub use symbol::{Symbol, SymbolTable};
