use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{GrammarError, Reporter, Result};
use crate::expr::{CompoundKind, Distance, ExprKind, Expression, TreeBuilder};
use crate::symbol::{Symbol, SymbolTable};

/// The core rule set from RFC 5234, preloaded as a tentative source
/// unless excluded.
pub const RFC_5234_CORE: &str = "\
ALPHA  =  %x41-5A / %x61-7A   ; A-Z / a-z
BIT    =  \"0\" / \"1\"
CHAR   =  %x01-7F      ; any 7-bit US-ASCII character,
                       ;  excluding NUL
CR     =  %x0D         ; carriage return
CRLF   =  CR LF        ; Internet standard newline
CTL    =  %x00-1F / %x7F
                       ; controls
DIGIT  =  %x30-39      ; 0-9
DQUOTE =  %x22         ; \" (Double Quote)
HEXDIG =  DIGIT / \"A\" / \"B\" / \"C\" / \"D\" / \"E\" / \"F\"
HTAB   =  %x09         ; horizontal tab
LF     =  %x0A         ; linefeed
LWSP   =  *(WSP / CRLF WSP)
                       ; Use of this linear-white-space rule
                       ;  permits lines containing only white
                       ;  space that are no longer legal in
                       ;  mail headers and have caused
                       ;  interoperability problems in other
                       ;  contexts.
                       ; Do not use when defining mail
                       ;  headers and use with caution in
                       ;  other contexts.
OCTET  =  %x00-FF      ; 8 bits of data
SP     =  %x20
VCHAR  =  %x21-7E      ; visible (printing) characters
WSP    =  SP / HTAB    ; white space
";

/// Input name under which the core rules are registered.
pub const CORE_GRAMMAR_NAME: &str = "ABNF core grammar included in RFC 5234";

/// Configuration options controlling which notation is accepted.
#[derive(Debug, Clone)]
pub struct GrammarConfig {
    /// Strict RFC 5234 + 7405 only: no single-quoted literals and no
    /// `{...}` grouping.
    pub legal: bool,
    /// Accept the RFC 7405 `%s"..."` / `%i"..."` literal prefixes.
    pub rfc7405: bool,
    /// Accept `<prose>` elements; when false their presence is an error.
    pub allow_prose: bool,
    /// Allow `_` in rule names.
    pub underscore: bool,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        GrammarConfig {
            legal: false,
            rfc7405: true,
            allow_prose: true,
            underscore: false,
        }
    }
}

/// Handle to a registered nonterminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtId(usize);

/// One named rule: its accumulated expression plus bookkeeping flags.
#[derive(Debug)]
pub struct Nonterminal {
    name: Symbol,
    /// The rule's expression; alternatives from `=/` definitions are
    /// merged into one alternation here.
    pub(crate) expr: Option<Expression>,
    pub(crate) defined: bool,
    pub(crate) referenced: bool,
    /// Defined by a tentative source (core rules, `-t` files); unused
    /// tentative rules are not worth a note.
    pub(crate) tentative: bool,
    pub(crate) def_site: Option<(Symbol, u32)>,
    pub(crate) ref_site: Option<(Symbol, u32)>,
    pub(crate) distance: Distance,
}

impl Nonterminal {
    pub fn name(&self) -> Symbol {
        self.name
    }

    pub fn expression(&self) -> Option<&Expression> {
        self.expr.as_ref()
    }

    pub fn is_defined(&self) -> bool {
        self.defined
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }
}

/// The whole grammar for one run: symbol table, nonterminal registry,
/// start symbol, configuration, and the error-reporting surface.
///
/// Everything that used to be process-global in tools of this kind is
/// a field here, so independent grammars can coexist in one process
/// (which is exactly what the tests do).
#[derive(Debug)]
pub struct Grammar {
    pub symbols: SymbolTable,
    pub reporter: Reporter,
    config: GrammarConfig,
    tree: TreeBuilder,
    entries: Vec<Nonterminal>,
    index: HashMap<Symbol, NtId>,
    start: Option<Symbol>,
    /// First rule defined by a non-tentative source; the default start
    /// symbol when none is set explicitly.
    first_defined: Option<Symbol>,
    input_file: Symbol,
    input_tentative: bool,
}

impl Grammar {
    pub fn new(config: GrammarConfig) -> Self {
        let mut symbols = SymbolTable::new();
        let input_file = symbols.intern_str("*no input*");
        Grammar {
            symbols,
            reporter: Reporter::new(),
            config,
            tree: TreeBuilder::default(),
            entries: Vec::new(),
            index: HashMap::new(),
            start: None,
            first_defined: None,
            input_file,
            input_tentative: false,
        }
    }

    /// Load a grammar from a single file with default configuration:
    /// core rules preloaded, then the file, then the consistency check.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut grammar = Grammar::new(GrammarConfig::default());
        grammar.preload_core()?;
        let text = fs::read_to_string(&path)?;
        grammar.add_source(&text, &path.as_ref().display().to_string(), false)?;
        grammar.check()?;
        if !grammar.reporter.ok() {
            return Err(GrammarError::ErrorsRecorded(grammar.reporter.error_count()));
        }
        Ok(grammar)
    }

    pub fn config(&self) -> &GrammarConfig {
        &self.config
    }

    /// Parse `text` and merge its rules into this grammar.
    pub fn add_source(&mut self, text: &str, name: &str, tentative: bool) -> Result<()> {
        crate::parser::parse_source(self, text, name, tentative)
    }

    /// Read and parse one grammar file.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P, tentative: bool) -> Result<()> {
        let text = fs::read_to_string(&path)?;
        self.add_source(&text, &path.as_ref().display().to_string(), tentative)
    }

    /// Preload the RFC 5234 core rules as a tentative source.
    pub fn preload_core(&mut self) -> Result<()> {
        self.add_source(RFC_5234_CORE, CORE_GRAMMAR_NAME, true)
    }

    /// Run the consistency checker; see [`crate::check`].
    pub fn check(&mut self) -> Result<()> {
        crate::check::check(self)
    }

    // --- registry -----------------------------------------------------

    /// Look up `name`, creating an undefined placeholder when absent.
    pub fn lookup_or_create(&mut self, name: Symbol) -> NtId {
        if let Some(&id) = self.index.get(&name) {
            return id;
        }
        let id = NtId(self.entries.len());
        self.entries.push(Nonterminal {
            name,
            expr: None,
            defined: false,
            referenced: false,
            tentative: false,
            def_site: None,
            ref_site: None,
            distance: Distance::Unknown,
        });
        self.index.insert(name, id);
        id
    }

    /// Look up `name` without creating anything.
    pub fn lookup(&self, name: Symbol) -> Option<NtId> {
        self.index.get(&name).copied()
    }

    pub fn nonterminal(&self, id: NtId) -> &Nonterminal {
        &self.entries[id.0]
    }

    pub(crate) fn nonterminal_mut(&mut self, id: NtId) -> &mut Nonterminal {
        &mut self.entries[id.0]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered nonterminals, in first-contact order.
    pub fn ids(&self) -> impl Iterator<Item = NtId> + use<> {
        (0..self.entries.len()).map(NtId)
    }

    pub fn name_of(&self, id: NtId) -> String {
        self.symbols.display(self.entries[id.0].name)
    }

    pub fn mark_defined(&mut self, id: NtId, line: u32) {
        let file = self.input_file;
        let tentative = self.input_tentative;
        let nt = &mut self.entries[id.0];
        if !nt.defined {
            nt.tentative = tentative;
            nt.def_site = Some((file, line));
        }
        nt.defined = true;
        if !tentative && self.first_defined.is_none() {
            self.first_defined = Some(self.entries[id.0].name);
        }
    }

    pub fn mark_referenced(&mut self, id: NtId, line: u32) {
        let file = self.input_file;
        let nt = &mut self.entries[id.0];
        if nt.ref_site.is_none() {
            nt.ref_site = Some((file, line));
        }
        nt.referenced = true;
    }

    /// Drop an existing definition so a later one can replace it.
    /// Used when a real source overrides a tentative rule.
    pub(crate) fn clear_definition(&mut self, id: NtId) {
        let nt = &mut self.entries[id.0];
        nt.expr = None;
        nt.defined = false;
        nt.tentative = false;
        nt.def_site = None;
    }

    /// Merge `expr` into the nonterminal's alternation, mirroring the
    /// `=/` incremental-alternation semantics: the first definition
    /// establishes the expression, later ones append alternatives.
    pub fn add_alternative(&mut self, id: NtId, expr: Expression) {
        let Grammar { tree, entries, .. } = self;
        tree.compound_add(CompoundKind::Alternation, &mut entries[id.0].expr, expr);
    }

    // --- tree construction --------------------------------------------

    /// Allocate a node stamped with the current input file and `line`.
    pub fn node(&mut self, kind: ExprKind, line: u32) -> Expression {
        self.tree.node(kind, self.input_file, line)
    }

    /// Append `incoming` into a caller-held compound slot; see
    /// [`TreeBuilder::compound_add`].
    pub fn compound_add(
        &mut self,
        kind: CompoundKind,
        slot: &mut Option<Expression>,
        incoming: Expression,
    ) {
        self.tree.compound_add(kind, slot, incoming);
    }

    // --- input bookkeeping --------------------------------------------

    /// Note the source all subsequently created nodes belong to.
    pub(crate) fn begin_input(&mut self, name: &str, tentative: bool) {
        self.input_file = self.symbols.intern_str(name);
        self.input_tentative = tentative;
    }

    pub(crate) fn input_is_tentative(&self) -> bool {
        self.input_tentative
    }

    // --- start symbol -------------------------------------------------

    /// Set the start symbol by (case-insensitive) name.
    pub fn set_start(&mut self, name: &str) {
        let sym = self.symbols.intern_name(name);
        self.start = Some(sym);
    }

    /// The designated start symbol: the explicit one, or the first rule
    /// defined by a non-tentative source.
    pub fn start_symbol(&self) -> Option<Symbol> {
        self.start.or(self.first_defined)
    }

    pub fn start_id(&self) -> Option<NtId> {
        self.start_symbol().and_then(|sym| self.lookup(sym))
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Grammar::new(GrammarConfig::default())
    }
}
