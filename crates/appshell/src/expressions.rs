//! Syntax tree produced by the parser and consumed by the compiler.
//!
//! Positions are global offsets into a [`SourceFileSet`](crate::parse::SourceFileSet);
//! `0` means "no position" and is used for nodes synthesized after parsing,
//! such as the auto-print calls injected by the REPL.

use crate::parse::Pos;

/// Binary operators, including the short-circuiting logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Quo,
    #[strum(serialize = "%")]
    Rem,
    #[strum(serialize = "&")]
    And,
    #[strum(serialize = "|")]
    Or,
    #[strum(serialize = "^")]
    Xor,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
    #[strum(serialize = "&^")]
    AndNot,
    #[strum(serialize = "&&")]
    LAnd,
    #[strum(serialize = "||")]
    LOr,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEq,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEq,
}

impl Operator {
    /// Binding strength used by the precedence-climbing parser.
    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            Self::LOr => 1,
            Self::LAnd => 2,
            Self::Equal | Self::NotEqual | Self::Less | Self::LessEq | Self::Greater | Self::GreaterEq => 3,
            Self::Add | Self::Sub | Self::Or | Self::Xor => 4,
            Self::Mul | Self::Quo | Self::Rem | Self::Shl | Self::Shr | Self::And | Self::AndNot => 5,
        }
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "^")]
    BitNot,
}

/// The token that introduced an assignment statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `:=`, introduces a new name in the current scope.
    Define,
    /// `=`, rebinds an existing name or stores into a container.
    Assign,
    /// `+=`, `-=`, ... applies the operator to the current value first.
    Compound(Operator),
}

/// An identifier together with where it appeared.
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub name: String,
    pub pos: Pos,
}

/// An expression with the position of its first token.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprLoc {
    pub pos: Pos,
    pub expr: Expr,
}

impl ExprLoc {
    #[must_use]
    pub fn new(pos: Pos, expr: Expr) -> Self {
        Self { pos, expr }
    }
}

/// One `key: value` entry of a map literal.
#[derive(Debug, Clone, PartialEq)]
pub struct MapElement {
    pub key: String,
    pub key_pos: Pos,
    pub value: ExprLoc,
}

/// A `func(a, b, ...rest) { ... }` literal.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncLiteral {
    pub params: Vec<Identifier>,
    /// True when the last parameter collects extra arguments into an array.
    pub varargs: bool,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    String(String),
    Undefined,
    Array(Vec<ExprLoc>),
    Map(Vec<MapElement>),
    Func(Box<FuncLiteral>),
    Unary {
        op: UnaryOp,
        operand: Box<ExprLoc>,
    },
    Binary {
        op: Operator,
        lhs: Box<ExprLoc>,
        rhs: Box<ExprLoc>,
    },
    /// `cond ? if_true : if_false`
    Cond {
        cond: Box<ExprLoc>,
        if_true: Box<ExprLoc>,
        if_false: Box<ExprLoc>,
    },
    Call {
        func: Box<ExprLoc>,
        args: Vec<ExprLoc>,
        /// `f(xs...)` spreads the last argument.
        spread: bool,
    },
    Index {
        expr: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    Slice {
        expr: Box<ExprLoc>,
        low: Option<Box<ExprLoc>>,
        high: Option<Box<ExprLoc>>,
    },
    /// `expr.name`, sugar for `expr["name"]`.
    Selector {
        expr: Box<ExprLoc>,
        sel: String,
    },
    Paren(Box<ExprLoc>),
    Import(String),
    Error(Box<ExprLoc>),
    Immutable(Box<ExprLoc>),
}

/// A `{ ... }` statement list.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub pos: Pos,
    pub nodes: Vec<Node>,
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Expr(ExprLoc),
    Assign {
        pos: Pos,
        lhs: Vec<ExprLoc>,
        op: AssignOp,
        rhs: Vec<ExprLoc>,
    },
    IncDec {
        pos: Pos,
        expr: ExprLoc,
        inc: bool,
    },
    Block(Block),
    If {
        pos: Pos,
        init: Option<Box<Node>>,
        cond: ExprLoc,
        body: Block,
        /// Either another `If` or a `Block`.
        orelse: Option<Box<Node>>,
    },
    For {
        pos: Pos,
        init: Option<Box<Node>>,
        cond: Option<ExprLoc>,
        post: Option<Box<Node>>,
        body: Block,
    },
    /// `for v in xs` binds only the value; the key is then `_`.
    ForIn {
        pos: Pos,
        key: Identifier,
        value: Identifier,
        iterable: ExprLoc,
        body: Block,
    },
    Break(Pos),
    Continue(Pos),
    Return {
        pos: Pos,
        value: Option<ExprLoc>,
    },
    Export {
        pos: Pos,
        value: ExprLoc,
    },
}

impl Node {
    /// Position of the first token of the statement.
    #[must_use]
    pub fn pos(&self) -> Pos {
        match self {
            Self::Expr(expr) => expr.pos,
            Self::Block(block) => block.pos,
            Self::IncDec { pos, .. }
            | Self::Assign { pos, .. }
            | Self::If { pos, .. }
            | Self::For { pos, .. }
            | Self::ForIn { pos, .. }
            | Self::Return { pos, .. }
            | Self::Export { pos, .. } => *pos,
            Self::Break(pos) | Self::Continue(pos) => *pos,
        }
    }
}

/// A parsed source file: the top-level statements plus the index of the file
/// in the set it was registered with.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub file_index: usize,
    pub nodes: Vec<Node>,
}
