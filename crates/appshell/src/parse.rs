//! Lexer and recursive-descent parser for the scripting language.
//!
//! The grammar is Go-flavoured: statements are separated by semicolons which the
//! lexer inserts automatically at line ends after an identifier, literal, closing
//! bracket, `++`, `--`, or one of `break`/`continue`/`return`. Inside brackets,
//! calls and literals the parser skips those inserted separators, so multi-line
//! literals do not need a trailing comma.
//!
//! Every parsed file is registered in a [`SourceFileSet`] first; positions stored
//! in the syntax tree are global offsets that the set resolves back to
//! `name:line:column`.

use std::fmt;

use crate::expressions::{
    AssignOp, Block, Expr, ExprLoc, File, FuncLiteral, Identifier, MapElement, Node, Operator, UnaryOp,
};

/// A global source offset. `NO_POS` means "unknown".
pub type Pos = usize;

/// Position used for synthesized nodes.
pub const NO_POS: Pos = 0;

/// A resolved, human-readable source position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePos {
    pub filename: String,
    /// 1-based; `0` when the position is unknown.
    pub line: usize,
    /// 1-based byte column.
    pub column: usize,
}

impl SourcePos {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "-");
        }
        if self.filename.is_empty() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}:{}", self.filename, self.line, self.column)
        }
    }
}

/// One virtual source file inside a [`SourceFileSet`].
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    base: usize,
    size: usize,
    /// Byte offsets of the first character of every line.
    lines: Vec<usize>,
}

impl SourceFile {
    fn position(&self, pos: Pos) -> SourcePos {
        let offset = pos - self.base;
        let line_index = match self.lines.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index.saturating_sub(1),
        };
        SourcePos {
            filename: self.name.clone(),
            line: line_index + 1,
            column: offset - self.lines[line_index] + 1,
        }
    }
}

/// Ordered registry of source files; each file occupies a disjoint range of
/// global positions so a single `Pos` identifies both file and offset.
#[derive(Debug, Clone)]
pub struct SourceFileSet {
    base: usize,
    files: Vec<SourceFile>,
}

impl Default for SourceFileSet {
    fn default() -> Self {
        Self {
            base: 1,
            files: Vec::new(),
        }
    }
}

impl SourceFileSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new file and returns its index in the set.
    pub fn add_file(&mut self, name: &str, src: &str) -> usize {
        let lines = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(index, _)| index + 1))
            .collect();
        let file = SourceFile {
            name: name.to_owned(),
            base: self.base,
            size: src.len(),
            lines,
        };
        self.base += src.len() + 1;
        self.files.push(file);
        self.files.len() - 1
    }

    /// Resolves a global position; unknown positions resolve to an invalid
    /// `SourcePos` rather than failing.
    #[must_use]
    pub fn position(&self, pos: Pos) -> SourcePos {
        if pos == NO_POS {
            return SourcePos::default();
        }
        self.files
            .iter()
            .rev()
            .find(|file| file.base <= pos && pos <= file.base + file.size)
            .map(|file| file.position(pos))
            .unwrap_or_default()
    }
}

/// A syntax error with its resolved position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub pos: SourcePos,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse Error: {}\n\tat {}", self.message, self.pos)
    }
}

impl std::error::Error for ParseError {}

/// Registers `code` under `name` in `file_set` and parses it.
pub fn parse(file_set: &mut SourceFileSet, name: &str, code: &str) -> Result<File, ParseError> {
    let file_index = file_set.add_file(name, code);
    let base = file_set.files[file_index].base;
    Lexer::new(code, base)
        .tokenize()
        .and_then(|tokens| Parser::new(tokens).parse_file())
        .map(|nodes| File { file_index, nodes })
        .map_err(|raw| ParseError {
            pos: file_set.position(raw.pos),
            message: raw.message,
        })
}

/// Error before the position has been resolved against the file set.
#[derive(Debug)]
struct RawError {
    pos: Pos,
    message: String,
}

type PResult<T> = Result<T, RawError>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
    Add,
    Sub,
    Mul,
    Quo,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AndNot,
    AddAssign,
    SubAssign,
    MulAssign,
    QuoAssign,
    RemAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    ShlAssign,
    ShrAssign,
    AndNotAssign,
    LAnd,
    LOr,
    Inc,
    Dec,
    Equal,
    Less,
    Greater,
    Assign,
    Not,
    NotEqual,
    LessEq,
    GreaterEq,
    Define,
    Ellipsis,
    LParen,
    LBrack,
    LBrace,
    Comma,
    Period,
    RParen,
    RBrack,
    RBrace,
    /// `true` when inserted by the lexer at a line end.
    Semicolon(bool),
    Colon,
    Question,
    Break,
    Continue,
    Else,
    For,
    Func,
    Error,
    Immutable,
    If,
    Return,
    Export,
    True,
    False,
    In,
    Undefined,
    Import,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ident(name) => return f.write_str(name),
            Self::Int(value) => return write!(f, "{value}"),
            Self::Float(value) => return write!(f, "{value}"),
            Self::Char(value) => return write!(f, "{value:?}"),
            Self::String(value) => return write!(f, "{value:?}"),
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Quo => "/",
            Self::Rem => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::AndNot => "&^",
            Self::AddAssign => "+=",
            Self::SubAssign => "-=",
            Self::MulAssign => "*=",
            Self::QuoAssign => "/=",
            Self::RemAssign => "%=",
            Self::AndAssign => "&=",
            Self::OrAssign => "|=",
            Self::XorAssign => "^=",
            Self::ShlAssign => "<<=",
            Self::ShrAssign => ">>=",
            Self::AndNotAssign => "&^=",
            Self::LAnd => "&&",
            Self::LOr => "||",
            Self::Inc => "++",
            Self::Dec => "--",
            Self::Equal => "==",
            Self::Less => "<",
            Self::Greater => ">",
            Self::Assign => "=",
            Self::Not => "!",
            Self::NotEqual => "!=",
            Self::LessEq => "<=",
            Self::GreaterEq => ">=",
            Self::Define => ":=",
            Self::Ellipsis => "...",
            Self::LParen => "(",
            Self::LBrack => "[",
            Self::LBrace => "{",
            Self::Comma => ",",
            Self::Period => ".",
            Self::RParen => ")",
            Self::RBrack => "]",
            Self::RBrace => "}",
            Self::Semicolon(true) => "newline",
            Self::Semicolon(false) => ";",
            Self::Colon => ":",
            Self::Question => "?",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Else => "else",
            Self::For => "for",
            Self::Func => "func",
            Self::Error => "error",
            Self::Immutable => "immutable",
            Self::If => "if",
            Self::Return => "return",
            Self::Export => "export",
            Self::True => "true",
            Self::False => "false",
            Self::In => "in",
            Self::Undefined => "undefined",
            Self::Import => "import",
            Self::Eof => "EOF",
        };
        f.write_str(text)
    }
}

impl Token {
    fn keyword(ident: &str) -> Option<Self> {
        let token = match ident {
            "break" => Self::Break,
            "continue" => Self::Continue,
            "else" => Self::Else,
            "for" => Self::For,
            "func" => Self::Func,
            "error" => Self::Error,
            "immutable" => Self::Immutable,
            "if" => Self::If,
            "return" => Self::Return,
            "export" => Self::Export,
            "true" => Self::True,
            "false" => Self::False,
            "in" => Self::In,
            "undefined" => Self::Undefined,
            "import" => Self::Import,
            _ => return None,
        };
        Some(token)
    }

    /// Whether a line break after this token terminates the statement.
    fn ends_statement(&self) -> bool {
        matches!(
            self,
            Self::Ident(_)
                | Self::Int(_)
                | Self::Float(_)
                | Self::Char(_)
                | Self::String(_)
                | Self::Break
                | Self::Continue
                | Self::Return
                | Self::True
                | Self::False
                | Self::Undefined
                | Self::Inc
                | Self::Dec
                | Self::RParen
                | Self::RBrack
                | Self::RBrace
        )
    }

    fn binary_operator(&self) -> Option<Operator> {
        let op = match self {
            Self::Add => Operator::Add,
            Self::Sub => Operator::Sub,
            Self::Mul => Operator::Mul,
            Self::Quo => Operator::Quo,
            Self::Rem => Operator::Rem,
            Self::And => Operator::And,
            Self::Or => Operator::Or,
            Self::Xor => Operator::Xor,
            Self::Shl => Operator::Shl,
            Self::Shr => Operator::Shr,
            Self::AndNot => Operator::AndNot,
            Self::LAnd => Operator::LAnd,
            Self::LOr => Operator::LOr,
            Self::Equal => Operator::Equal,
            Self::NotEqual => Operator::NotEqual,
            Self::Less => Operator::Less,
            Self::LessEq => Operator::LessEq,
            Self::Greater => Operator::Greater,
            Self::GreaterEq => Operator::GreaterEq,
            _ => return None,
        };
        Some(op)
    }

    fn assign_operator(&self) -> Option<AssignOp> {
        let op = match self {
            Self::Define => AssignOp::Define,
            Self::Assign => AssignOp::Assign,
            Self::AddAssign => AssignOp::Compound(Operator::Add),
            Self::SubAssign => AssignOp::Compound(Operator::Sub),
            Self::MulAssign => AssignOp::Compound(Operator::Mul),
            Self::QuoAssign => AssignOp::Compound(Operator::Quo),
            Self::RemAssign => AssignOp::Compound(Operator::Rem),
            Self::AndAssign => AssignOp::Compound(Operator::And),
            Self::OrAssign => AssignOp::Compound(Operator::Or),
            Self::XorAssign => AssignOp::Compound(Operator::Xor),
            Self::ShlAssign => AssignOp::Compound(Operator::Shl),
            Self::ShrAssign => AssignOp::Compound(Operator::Shr),
            Self::AndNotAssign => AssignOp::Compound(Operator::AndNot),
            _ => return None,
        };
        Some(op)
    }
}

/// Operator spellings, longest first so that greedy matching is correct.
const OPERATORS: &[(&str, Token)] = &[
    ("&^=", Token::AndNotAssign),
    ("<<=", Token::ShlAssign),
    (">>=", Token::ShrAssign),
    ("...", Token::Ellipsis),
    ("&^", Token::AndNot),
    ("+=", Token::AddAssign),
    ("-=", Token::SubAssign),
    ("*=", Token::MulAssign),
    ("/=", Token::QuoAssign),
    ("%=", Token::RemAssign),
    ("&=", Token::AndAssign),
    ("|=", Token::OrAssign),
    ("^=", Token::XorAssign),
    ("<<", Token::Shl),
    (">>", Token::Shr),
    ("&&", Token::LAnd),
    ("||", Token::LOr),
    ("++", Token::Inc),
    ("--", Token::Dec),
    ("==", Token::Equal),
    ("!=", Token::NotEqual),
    ("<=", Token::LessEq),
    (">=", Token::GreaterEq),
    (":=", Token::Define),
    ("+", Token::Add),
    ("-", Token::Sub),
    ("*", Token::Mul),
    ("/", Token::Quo),
    ("%", Token::Rem),
    ("&", Token::And),
    ("|", Token::Or),
    ("^", Token::Xor),
    ("<", Token::Less),
    (">", Token::Greater),
    ("=", Token::Assign),
    ("!", Token::Not),
    ("(", Token::LParen),
    ("[", Token::LBrack),
    ("{", Token::LBrace),
    (",", Token::Comma),
    (".", Token::Period),
    (")", Token::RParen),
    ("]", Token::RBrack),
    ("}", Token::RBrace),
    (";", Token::Semicolon(false)),
    (":", Token::Colon),
    ("?", Token::Question),
];

struct Lexer<'a> {
    src: &'a str,
    offset: usize,
    base: usize,
    tokens: Vec<(Token, Pos)>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, base: usize) -> Self {
        Self {
            src,
            offset: 0,
            base,
            tokens: Vec::new(),
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> RawError {
        RawError {
            pos: self.base + offset,
            message: message.into(),
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.offset..].chars().next()
    }

    fn peek_char_at(&self, skip: usize) -> Option<char> {
        self.src[self.offset..].chars().nth(skip)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.offset += ch.len_utf8();
        Some(ch)
    }

    fn wants_semicolon(&self) -> bool {
        self.tokens.last().is_some_and(|(token, _)| token.ends_statement())
    }

    fn push(&mut self, token: Token, offset: usize) {
        self.tokens.push((token, self.base + offset));
    }

    fn tokenize(mut self) -> PResult<Vec<(Token, Pos)>> {
        loop {
            let Some(ch) = self.peek_char() else {
                if self.wants_semicolon() {
                    self.push(Token::Semicolon(true), self.offset);
                }
                self.push(Token::Eof, self.offset);
                return Ok(self.tokens);
            };
            let start = self.offset;
            match ch {
                '\n' => {
                    self.bump();
                    if self.wants_semicolon() {
                        self.push(Token::Semicolon(true), start);
                    }
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' if self.peek_char_at(1) == Some('/') => {
                    while self.peek_char().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                '/' if self.peek_char_at(1) == Some('*') => self.skip_block_comment(start)?,
                c if c.is_alphabetic() || c == '_' => {
                    while self.peek_char().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                        self.bump();
                    }
                    let word = &self.src[start..self.offset];
                    let token = Token::keyword(word).unwrap_or_else(|| Token::Ident(word.to_owned()));
                    self.push(token, start);
                }
                c if c.is_ascii_digit() => {
                    let token = self.scan_number()?;
                    self.push(token, start);
                }
                '.' if self.peek_char_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                    let token = self.scan_number()?;
                    self.push(token, start);
                }
                '"' => {
                    let value = self.scan_string()?;
                    self.push(Token::String(value), start);
                }
                '`' => {
                    self.bump();
                    let Some(len) = self.src[self.offset..].find('`') else {
                        return Err(self.error(start, "raw string literal not terminated"));
                    };
                    let value = self.src[self.offset..self.offset + len].replace('\r', "");
                    self.offset += len + 1;
                    self.push(Token::String(value), start);
                }
                '\'' => {
                    let value = self.scan_char()?;
                    self.push(Token::Char(value), start);
                }
                _ => {
                    let rest = &self.src[self.offset..];
                    let Some((text, token)) = OPERATORS.iter().find(|(text, _)| rest.starts_with(text)) else {
                        return Err(self.error(start, format!("illegal character {:?}", ch)));
                    };
                    self.offset += text.len();
                    self.push(token.clone(), start);
                }
            }
        }
    }

    fn skip_block_comment(&mut self, start: usize) -> PResult<()> {
        let Some(len) = self.src[start + 2..].find("*/") else {
            return Err(self.error(start, "comment not terminated"));
        };
        let body = &self.src[start + 2..start + 2 + len];
        self.offset = start + 2 + len + 2;
        if body.contains('\n') && self.wants_semicolon() {
            self.push(Token::Semicolon(true), start);
        }
        Ok(())
    }

    fn scan_digits(&mut self, radix: u32) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek_char() {
            if c == '_' {
                self.bump();
            } else if c.is_digit(radix) {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        digits
    }

    fn scan_number(&mut self) -> PResult<Token> {
        let start = self.offset;
        if self.peek_char() == Some('0') {
            let radix = match self.peek_char_at(1) {
                Some('x' | 'X') => Some(16),
                Some('b' | 'B') => Some(2),
                Some('o' | 'O') => Some(8),
                _ => None,
            };
            if let Some(radix) = radix {
                self.offset += 2;
                let digits = self.scan_digits(radix);
                return i64::from_str_radix(&digits, radix)
                    .map(Token::Int)
                    .map_err(|_| self.error(start, format!("invalid integer literal '{}'", &self.src[start..self.offset])));
            }
        }

        let mut text = self.scan_digits(10);
        let mut is_float = false;
        if self.peek_char() == Some('.') && self.peek_char_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            text.push('.');
            text.push_str(&self.scan_digits(10));
            is_float = true;
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let sign = self.peek_char_at(1);
            let has_sign = matches!(sign, Some('+' | '-'));
            let digit = if has_sign { self.peek_char_at(2) } else { sign };
            if digit.is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
                text.push('e');
                if has_sign {
                    if let Some(sign) = self.bump() {
                        text.push(sign);
                    }
                }
                text.push_str(&self.scan_digits(10));
                is_float = true;
            }
        }

        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(start, format!("invalid float literal '{text}'")))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| self.error(start, format!("invalid integer literal '{text}'")))
        }
    }

    fn scan_escape(&mut self, quote: char) -> PResult<char> {
        let start = self.offset;
        let Some(ch) = self.bump() else {
            return Err(self.error(start, "escape sequence not terminated"));
        };
        let hex = |lexer: &mut Self, count: usize| -> PResult<char> {
            let end = lexer.offset + count;
            let digits = lexer.src.get(lexer.offset..end).unwrap_or_default();
            let value = u32::from_str_radix(digits, 16)
                .ok()
                .filter(|_| digits.len() == count)
                .and_then(char::from_u32)
                .ok_or_else(|| lexer.error(start, "invalid escape sequence"))?;
            lexer.offset = end;
            Ok(value)
        };
        let value = match ch {
            'a' => '\u{07}',
            'b' => '\u{08}',
            'f' => '\u{0C}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\u{0B}',
            '\\' => '\\',
            'x' => hex(self, 2)?,
            'u' => hex(self, 4)?,
            'U' => hex(self, 8)?,
            c if c == quote => quote,
            c if c.is_digit(8) => {
                let mut value = c.to_digit(8).unwrap_or_default();
                for _ in 0..2 {
                    let digit = self
                        .peek_char()
                        .and_then(|c| c.to_digit(8))
                        .ok_or_else(|| self.error(start, "invalid escape sequence"))?;
                    self.bump();
                    value = value * 8 + digit;
                }
                char::from_u32(value).ok_or_else(|| self.error(start, "invalid escape sequence"))?
            }
            _ => return Err(self.error(start, "unknown escape sequence")),
        };
        Ok(value)
    }

    fn scan_string(&mut self) -> PResult<String> {
        let start = self.offset;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error(start, "string literal not terminated")),
                Some('"') => return Ok(value),
                Some('\\') => value.push(self.scan_escape('"')?),
                Some(c) => value.push(c),
            }
        }
    }

    fn scan_char(&mut self) -> PResult<char> {
        let start = self.offset;
        self.bump();
        let value = match self.bump() {
            None | Some('\n' | '\'') => return Err(self.error(start, "illegal rune literal")),
            Some('\\') => self.scan_escape('\'')?,
            Some(c) => c,
        };
        if self.bump() != Some('\'') {
            return Err(self.error(start, "illegal rune literal"));
        }
        Ok(value)
    }
}

struct Parser {
    tokens: Vec<(Token, Pos)>,
    index: usize,
}

impl Parser {
    fn new(tokens: Vec<(Token, Pos)>) -> Self {
        Self { tokens, index: 0 }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let index = (self.index + ahead).min(self.tokens.len() - 1);
        &self.tokens[index].0
    }

    fn pos(&self) -> Pos {
        self.tokens[self.index.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> (Token, Pos) {
        let item = self.tokens[self.index.min(self.tokens.len() - 1)].clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        item
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn at_semicolon(&self) -> bool {
        matches!(self.peek(), Token::Semicolon(_))
    }

    fn error_expected(&self, what: &str) -> RawError {
        RawError {
            pos: self.pos(),
            message: format!("expected {what}, found '{}'", self.peek()),
        }
    }

    fn expect(&mut self, token: &Token) -> PResult<Pos> {
        if self.at(token) {
            Ok(self.advance().1)
        } else {
            Err(self.error_expected(&format!("'{token}'")))
        }
    }

    /// Skips separators the lexer inserted at line ends.
    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Token::Semicolon(true)) {
            self.advance();
        }
    }

    fn parse_file(mut self) -> PResult<Vec<Node>> {
        let nodes = self.parse_stmt_list()?;
        if !self.at(&Token::Eof) {
            return Err(self.error_expected("statement"));
        }
        Ok(nodes)
    }

    fn parse_stmt_list(&mut self) -> PResult<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            match self.peek() {
                Token::Eof | Token::RBrace => return Ok(nodes),
                Token::Semicolon(_) => {
                    self.advance();
                }
                _ => {
                    nodes.push(self.parse_stmt()?);
                    self.expect_semicolon()?;
                }
            }
        }
    }

    fn expect_semicolon(&mut self) -> PResult<()> {
        match self.peek() {
            Token::Semicolon(_) => {
                self.advance();
                Ok(())
            }
            Token::RBrace | Token::Eof => Ok(()),
            _ => Err(self.error_expected("';'")),
        }
    }

    fn parse_block(&mut self) -> PResult<Block> {
        let pos = self.expect(&Token::LBrace)?;
        let nodes = self.parse_stmt_list()?;
        self.expect(&Token::RBrace)?;
        Ok(Block { pos, nodes })
    }

    fn parse_stmt(&mut self) -> PResult<Node> {
        let pos = self.pos();
        match self.peek() {
            Token::If => self.parse_if(),
            Token::For => self.parse_for(),
            Token::Break => {
                self.advance();
                Ok(Node::Break(pos))
            }
            Token::Continue => {
                self.advance();
                Ok(Node::Continue(pos))
            }
            Token::Return => {
                self.advance();
                let value = if self.at_semicolon() || self.at(&Token::RBrace) || self.at(&Token::Eof) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Node::Return { pos, value })
            }
            Token::Export => {
                self.advance();
                let value = self.parse_expr()?;
                Ok(Node::Export { pos, value })
            }
            Token::LBrace => Ok(Node::Block(self.parse_block()?)),
            _ => self.parse_simple_stmt(),
        }
    }

    fn parse_simple_stmt(&mut self) -> PResult<Node> {
        let pos = self.pos();
        let mut lhs = self.parse_expr_list()?;

        if let Some(op) = self.peek().assign_operator() {
            self.advance();
            let rhs = self.parse_expr_list()?;
            return Ok(Node::Assign { pos, lhs, op, rhs });
        }

        if lhs.len() > 1 {
            return Err(RawError {
                pos,
                message: format!("expected 1 expression, found {}", lhs.len()),
            });
        }
        let expr = lhs.pop().ok_or_else(|| self.error_expected("expression"))?;

        match self.peek() {
            Token::Inc | Token::Dec => {
                let (token, _) = self.advance();
                Ok(Node::IncDec {
                    pos,
                    expr,
                    inc: token == Token::Inc,
                })
            }
            _ => Ok(Node::Expr(expr)),
        }
    }

    /// Splits an `if`/`for` header into an optional init statement and the
    /// condition expression.
    fn parse_header(&mut self, keyword: &str) -> PResult<(Option<Box<Node>>, ExprLoc)> {
        if self.at(&Token::LBrace) {
            return Err(self.error_expected(&format!("condition in {keyword} statement")));
        }
        let first = if self.at_semicolon() {
            None
        } else {
            Some(self.parse_simple_stmt()?)
        };
        if self.at_semicolon() {
            self.advance();
            let cond = self.parse_expr()?;
            return Ok((first.map(Box::new), cond));
        }
        match first {
            Some(Node::Expr(cond)) => Ok((None, cond)),
            Some(other) => Err(RawError {
                pos: other.pos(),
                message: format!("expected condition in {keyword} statement"),
            }),
            None => Err(self.error_expected("condition")),
        }
    }

    fn parse_if(&mut self) -> PResult<Node> {
        let pos = self.expect(&Token::If)?;
        let (init, cond) = self.parse_header("if")?;
        let body = self.parse_block()?;
        let orelse = if self.at(&Token::Else) {
            self.advance();
            match self.peek() {
                Token::If => Some(Box::new(self.parse_if()?)),
                Token::LBrace => Some(Box::new(Node::Block(self.parse_block()?))),
                _ => return Err(self.error_expected("if statement or block")),
            }
        } else {
            None
        };
        Ok(Node::If {
            pos,
            init,
            cond,
            body,
            orelse,
        })
    }

    fn is_for_in(&self) -> bool {
        matches!(self.peek(), Token::Ident(_))
            && (self.peek_at(1) == &Token::In
                || (self.peek_at(1) == &Token::Comma
                    && matches!(self.peek_at(2), Token::Ident(_))
                    && self.peek_at(3) == &Token::In))
    }

    fn parse_identifier(&mut self) -> PResult<Identifier> {
        match self.advance() {
            (Token::Ident(name), pos) => Ok(Identifier { name, pos }),
            (token, pos) => Err(RawError {
                pos,
                message: format!("expected identifier, found '{token}'"),
            }),
        }
    }

    fn parse_for(&mut self) -> PResult<Node> {
        let pos = self.expect(&Token::For)?;
        if self.at(&Token::LBrace) {
            let body = self.parse_block()?;
            return Ok(Node::For {
                pos,
                init: None,
                cond: None,
                post: None,
                body,
            });
        }

        if self.is_for_in() {
            let first = self.parse_identifier()?;
            let (key, value) = if self.at(&Token::Comma) {
                self.advance();
                let second = self.parse_identifier()?;
                (first, second)
            } else {
                let key = Identifier {
                    name: "_".to_owned(),
                    pos: first.pos,
                };
                (key, first)
            };
            self.expect(&Token::In)?;
            let iterable = self.parse_expr()?;
            let body = self.parse_block()?;
            return Ok(Node::ForIn {
                pos,
                key,
                value,
                iterable,
                body,
            });
        }

        let first = if self.at_semicolon() {
            None
        } else {
            Some(self.parse_simple_stmt()?)
        };

        if !self.at_semicolon() {
            let body = self.parse_block()?;
            return match first {
                Some(Node::Expr(cond)) => Ok(Node::For {
                    pos,
                    init: None,
                    cond: Some(cond),
                    post: None,
                    body,
                }),
                _ => Err(RawError {
                    pos,
                    message: "expected for loop condition".to_owned(),
                }),
            };
        }

        self.advance();
        let cond = if self.at_semicolon() {
            None
        } else {
            Some(self.parse_expr()?)
        };
        if !self.at_semicolon() {
            return Err(self.error_expected("';'"));
        }
        self.advance();
        let post = if self.at(&Token::LBrace) {
            None
        } else {
            Some(Box::new(self.parse_simple_stmt()?))
        };
        let body = self.parse_block()?;
        Ok(Node::For {
            pos,
            init: first.map(Box::new),
            cond,
            post,
            body,
        })
    }

    fn parse_expr_list(&mut self) -> PResult<Vec<ExprLoc>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.at(&Token::Comma) {
            self.advance();
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> PResult<ExprLoc> {
        let cond = self.parse_binary(1)?;
        if !self.at(&Token::Question) {
            return Ok(cond);
        }
        self.advance();
        self.skip_newlines();
        let if_true = self.parse_expr()?;
        self.skip_newlines();
        self.expect(&Token::Colon)?;
        self.skip_newlines();
        let if_false = self.parse_expr()?;
        Ok(ExprLoc::new(
            cond.pos,
            Expr::Cond {
                cond: Box::new(cond),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            },
        ))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> PResult<ExprLoc> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek().binary_operator() {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(precedence + 1)?;
            lhs = ExprLoc::new(
                lhs.pos,
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<ExprLoc> {
        let op = match self.peek() {
            Token::Add => UnaryOp::Plus,
            Token::Sub => UnaryOp::Neg,
            Token::Not => UnaryOp::Not,
            Token::Xor => UnaryOp::BitNot,
            _ => return self.parse_postfix(),
        };
        let (_, pos) = self.advance();
        let operand = self.parse_unary()?;
        Ok(ExprLoc::new(
            pos,
            Expr::Unary {
                op,
                operand: Box::new(operand),
            },
        ))
    }

    fn parse_postfix(&mut self) -> PResult<ExprLoc> {
        let mut expr = self.parse_operand()?;
        loop {
            let pos = expr.pos;
            match self.peek() {
                Token::Period => {
                    self.advance();
                    let sel = self.parse_identifier()?;
                    expr = ExprLoc::new(
                        pos,
                        Expr::Selector {
                            expr: Box::new(expr),
                            sel: sel.name,
                        },
                    );
                }
                Token::LBrack => {
                    self.advance();
                    self.skip_newlines();
                    let low = if self.at(&Token::Colon) {
                        None
                    } else {
                        Some(Box::new(self.parse_expr()?))
                    };
                    self.skip_newlines();
                    if self.at(&Token::Colon) {
                        self.advance();
                        self.skip_newlines();
                        let high = if self.at(&Token::RBrack) {
                            None
                        } else {
                            Some(Box::new(self.parse_expr()?))
                        };
                        self.skip_newlines();
                        self.expect(&Token::RBrack)?;
                        expr = ExprLoc::new(
                            pos,
                            Expr::Slice {
                                expr: Box::new(expr),
                                low,
                                high,
                            },
                        );
                    } else {
                        self.expect(&Token::RBrack)?;
                        let index = low.ok_or_else(|| self.error_expected("index"))?;
                        expr = ExprLoc::new(
                            pos,
                            Expr::Index {
                                expr: Box::new(expr),
                                index,
                            },
                        );
                    }
                }
                Token::LParen => {
                    self.advance();
                    let (args, spread) = self.parse_call_args()?;
                    expr = ExprLoc::new(
                        pos,
                        Expr::Call {
                            func: Box::new(expr),
                            args,
                            spread,
                        },
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_args(&mut self) -> PResult<(Vec<ExprLoc>, bool)> {
        let mut args = Vec::new();
        let mut spread = false;
        self.skip_newlines();
        while !self.at(&Token::RParen) {
            args.push(self.parse_expr()?);
            if self.at(&Token::Ellipsis) {
                self.advance();
                spread = true;
                self.skip_newlines();
                break;
            }
            self.skip_newlines();
            if !self.at(&Token::Comma) {
                break;
            }
            self.advance();
            self.skip_newlines();
        }
        self.expect(&Token::RParen)?;
        Ok((args, spread))
    }

    fn parse_operand(&mut self) -> PResult<ExprLoc> {
        let (token, pos) = self.advance();
        let expr = match token {
            Token::Ident(name) => Expr::Ident(name),
            Token::Int(value) => Expr::Int(value),
            Token::Float(value) => Expr::Float(value),
            Token::Char(value) => Expr::Char(value),
            Token::String(value) => Expr::String(value),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Undefined => Expr::Undefined,
            Token::LParen => {
                self.skip_newlines();
                let inner = self.parse_expr()?;
                self.skip_newlines();
                self.expect(&Token::RParen)?;
                Expr::Paren(Box::new(inner))
            }
            Token::LBrack => Expr::Array(self.parse_array_elements()?),
            Token::LBrace => Expr::Map(self.parse_map_elements()?),
            Token::Func => Expr::Func(Box::new(self.parse_func_literal()?)),
            Token::Error => Expr::Error(Box::new(self.parse_parenthesized()?)),
            Token::Immutable => Expr::Immutable(Box::new(self.parse_parenthesized()?)),
            Token::Import => {
                self.expect(&Token::LParen)?;
                let name = match self.advance() {
                    (Token::String(name), _) => name,
                    (token, pos) => {
                        return Err(RawError {
                            pos,
                            message: format!("expected module name string, found '{token}'"),
                        });
                    }
                };
                self.expect(&Token::RParen)?;
                Expr::Import(name)
            }
            token => {
                return Err(RawError {
                    pos,
                    message: format!("expected operand, found '{token}'"),
                });
            }
        };
        Ok(ExprLoc::new(pos, expr))
    }

    fn parse_parenthesized(&mut self) -> PResult<ExprLoc> {
        self.expect(&Token::LParen)?;
        self.skip_newlines();
        let expr = self.parse_expr()?;
        self.skip_newlines();
        self.expect(&Token::RParen)?;
        Ok(expr)
    }

    fn parse_array_elements(&mut self) -> PResult<Vec<ExprLoc>> {
        let mut elements = Vec::new();
        self.skip_newlines();
        while !self.at(&Token::RBrack) {
            elements.push(self.parse_expr()?);
            self.skip_newlines();
            if !self.at(&Token::Comma) {
                break;
            }
            self.advance();
            self.skip_newlines();
        }
        self.expect(&Token::RBrack)?;
        Ok(elements)
    }

    fn parse_map_elements(&mut self) -> PResult<Vec<MapElement>> {
        let mut elements = Vec::new();
        self.skip_newlines();
        while !self.at(&Token::RBrace) {
            let (key, key_pos) = match self.advance() {
                (Token::Ident(key) | Token::String(key), pos) => (key, pos),
                (token, pos) => {
                    return Err(RawError {
                        pos,
                        message: format!("expected map key, found '{token}'"),
                    });
                }
            };
            self.expect(&Token::Colon)?;
            self.skip_newlines();
            let value = self.parse_expr()?;
            elements.push(MapElement { key, key_pos, value });
            self.skip_newlines();
            if !self.at(&Token::Comma) {
                break;
            }
            self.advance();
            self.skip_newlines();
        }
        self.expect(&Token::RBrace)?;
        Ok(elements)
    }

    fn parse_func_literal(&mut self) -> PResult<FuncLiteral> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        let mut varargs = false;
        self.skip_newlines();
        while !self.at(&Token::RParen) {
            if self.at(&Token::Ellipsis) {
                self.advance();
                params.push(self.parse_identifier()?);
                varargs = true;
                self.skip_newlines();
                break;
            }
            params.push(self.parse_identifier()?);
            self.skip_newlines();
            if !self.at(&Token::Comma) {
                break;
            }
            self.advance();
            self.skip_newlines();
        }
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        Ok(FuncLiteral { params, varargs, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(code: &str) -> Result<File, ParseError> {
        parse(&mut SourceFileSet::new(), "(test)", code)
    }

    #[test]
    fn newline_terminates_statements() {
        let file = parse_one("a := 1\nb := a + 2\nb").unwrap();
        assert_eq!(file.nodes.len(), 3);
    }

    #[test]
    fn multi_line_map_literal_needs_no_trailing_comma() {
        let file = parse_one("m := {\n  a: 1,\n  \"b\": [1,\n 2]\n}").unwrap();
        assert_eq!(file.nodes.len(), 1);
    }

    #[test]
    fn error_position_points_at_offending_token() {
        let err = parse_one("x := 1\ny := )").unwrap_err();
        assert_eq!(err.pos.line, 2);
        assert_eq!(err.pos.column, 6);
        assert_eq!(err.to_string(), "Parse Error: expected operand, found ')'\n\tat (test):2:6");
    }

    #[test]
    fn positions_are_distinct_across_files() {
        let mut set = SourceFileSet::new();
        parse(&mut set, "first", "aaaa").unwrap();
        let second = parse(&mut set, "second", "b\nc").unwrap();
        let pos = second.nodes[1].pos();
        assert_eq!(set.position(pos).to_string(), "second:2:1");
    }
}
