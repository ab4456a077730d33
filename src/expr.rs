use crate::symbol::Symbol;

/// Minimal number of rule-reference steps needed to derive a terminal
/// string from a node. Computed by the consistency checker; the
/// generator uses it to steer away from recursion once the depth
/// budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    /// Not computed yet.
    Unknown,
    Finite(u64),
    /// No derivation from here ever reaches a terminal-only string.
    Infinite,
}

impl Distance {
    /// True when this distance is known and fits in `budget`.
    pub fn fits(self, budget: u32) -> bool {
        matches!(self, Distance::Finite(d) if d <= u64::from(budget))
    }

    pub fn is_finite(self) -> bool {
        matches!(self, Distance::Finite(_))
    }

    /// Sort key: finite distances order by value, everything else last.
    pub fn key(self) -> u64 {
        match self {
            Distance::Finite(d) => d,
            Distance::Unknown | Distance::Infinite => u64::MAX,
        }
    }

    /// Sequence cost: both sides must terminate.
    pub fn plus(self, other: Distance) -> Distance {
        match (self, other) {
            (Distance::Finite(a), Distance::Finite(b)) => Distance::Finite(a.saturating_add(b)),
            _ => Distance::Infinite,
        }
    }

    /// Cost of `n` mandatory repetitions. Zero repetitions cost
    /// nothing even when the body itself cannot terminate.
    pub fn scaled(self, n: u64) -> Distance {
        if n == 0 {
            return Distance::Finite(0);
        }
        match self {
            Distance::Finite(d) => Distance::Finite(d.saturating_mul(n)),
            _ => Distance::Infinite,
        }
    }

    /// The cheaper of two alternatives.
    pub fn or_min(self, other: Distance) -> Distance {
        if self.key() <= other.key() { self } else { other }
    }
}

/// Identity of a tree node, unique within one [`Grammar`](crate::Grammar).
/// The generator keys its coverage records on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// A single numeric terminal item: an inclusive value range, where
/// `lo == hi` for a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumRange {
    pub lo: u32,
    pub hi: u32,
}

/// The closed set of grammar node variants. Every walker matches
/// exhaustively, so adding a variant without updating the walkers is a
/// compile error.
#[derive(Debug)]
pub enum ExprKind {
    /// Ordered alternatives; exactly one child is derived.
    Alternation(Vec<Expression>),
    /// Ordered sequence; every child is derived in order.
    Concatenation(Vec<Expression>),
    /// `min` to `max` repetitions of the body; `None` means unbounded.
    Repetition {
        min: u32,
        max: Option<u32>,
        body: Box<Expression>,
    },
    /// A quoted literal. Case-insensitive literals get an arbitrary
    /// concrete case rendering per emission.
    Literal {
        bytes: Vec<u8>,
        case_sensitive: bool,
    },
    /// A `%b`/`%d`/`%x` terminal: a sequence of values or ranges.
    Values(Vec<NumRange>),
    /// A reference to another rule, by interned name. Never an owning
    /// link, which is what keeps ownership acyclic while the grammar's
    /// reference graph is not.
    Rule(Symbol),
    /// Free-text `<...>` content; a grammar-quality signal, rendered
    /// verbatim when prose is allowed at all.
    Prose(String),
}

/// A node of the grammar tree: the variant itself plus the source
/// position it came from and its computed distance.
#[derive(Debug)]
pub struct Expression {
    pub id: NodeId,
    pub file: Symbol,
    pub line: u32,
    pub distance: Distance,
    pub kind: ExprKind,
}

/// The two compound variants [`TreeBuilder::compound_add`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundKind {
    Alternation,
    Concatenation,
}

/// Allocates tree nodes, stamping each with a unique id. One builder
/// per grammar, so ids never collide across rules.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    next_id: u32,
}

impl TreeBuilder {
    pub fn node(&mut self, kind: ExprKind, file: Symbol, line: u32) -> Expression {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        Expression {
            id,
            file,
            line,
            distance: Distance::Unknown,
            kind,
        }
    }

    /// Append `incoming` as a child of the compound node in `slot`,
    /// creating or wrapping as needed: an empty slot adopts an
    /// incoming compound of the right kind and wraps anything else
    /// into a one-child compound; a lone node of a different kind is
    /// wrapped into a fresh compound first. This is how `a / b / c`
    /// grows one `Alternation` no matter which operator was parsed
    /// first.
    pub fn compound_add(
        &mut self,
        kind: CompoundKind,
        slot: &mut Option<Expression>,
        incoming: Expression,
    ) {
        let head = match slot.take() {
            None if matches_kind(&incoming, kind) => incoming,
            None => {
                let mut head = self.empty_compound(kind, incoming.file, incoming.line);
                compound_children(&mut head).push(incoming);
                head
            }
            Some(existing) => {
                let mut head = if matches_kind(&existing, kind) {
                    existing
                } else {
                    let mut head = self.empty_compound(kind, existing.file, existing.line);
                    compound_children(&mut head).push(existing);
                    head
                };
                compound_children(&mut head).push(incoming);
                head
            }
        };
        *slot = Some(head);
    }

    fn empty_compound(&mut self, kind: CompoundKind, file: Symbol, line: u32) -> Expression {
        let kind = match kind {
            CompoundKind::Alternation => ExprKind::Alternation(Vec::new()),
            CompoundKind::Concatenation => ExprKind::Concatenation(Vec::new()),
        };
        self.node(kind, file, line)
    }
}

fn matches_kind(expr: &Expression, kind: CompoundKind) -> bool {
    match (&expr.kind, kind) {
        (ExprKind::Alternation(_), CompoundKind::Alternation) => true,
        (ExprKind::Concatenation(_), CompoundKind::Concatenation) => true,
        _ => false,
    }
}

fn compound_children(expr: &mut Expression) -> &mut Vec<Expression> {
    match &mut expr.kind {
        ExprKind::Alternation(children) | ExprKind::Concatenation(children) => children,
        _ => unreachable!("compound_add only builds compound nodes"),
    }
}
