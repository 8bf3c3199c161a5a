//! Line Selectors
//!
//! A selector is the bracketed condition at the end of a recipe line:
//!
//! ```yaml
//! requirements:
//!   run:
//!     - menuinst  # [win]
//!     - enum34    # [py<34]
//! ```
//!
//! Only a closed set of tags is understood. Platform tags are `unix` and
//! `win`; interpreter tags are `py2k`, `py3k`, `pyNN` (e.g. `py27`) and
//! comparisons against `py` (e.g. `py>=35`). Tags combine with `and`, `or`,
//! `not` and parentheses.

use std::fmt;

use thiserror::Error;

use crate::environment::platform::RenderContext;

/// Errors raised while parsing a selector expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("selector is empty")]
    Empty,

    #[error("unknown tag '{0}' (platform tags are: unix, win; interpreter tags are: py, py2k, py3k, pyNN)")]
    UnknownTag(String),

    #[error("'py' must be compared with a version number, e.g. py<34")]
    MissingComparison,

    #[error("expected a number after '{op}', found '{found}'")]
    InvalidNumber { op: String, found: String },

    #[error("unexpected '{0}'")]
    Unexpected(String),

    #[error("unexpected end of selector")]
    UnexpectedEnd,

    #[error("unbalanced parentheses")]
    UnbalancedParens,

    #[error("invalid character '{0}'")]
    InvalidChar(char),
}

/// A boolean tag that needs no operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Unix,
    Win,
    Py2k,
    Py3k,
    /// `py27`, `py36`, ...
    Py(u32),
}

impl Tag {
    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "unix" => Some(Tag::Unix),
            "win" => Some(Tag::Win),
            "py2k" => Some(Tag::Py2k),
            "py3k" => Some(Tag::Py3k),
            _ => {
                let digits = ident.strip_prefix("py")?;
                if digits.len() >= 2 && digits.chars().all(|c| c.is_ascii_digit()) {
                    digits.parse().ok().map(Tag::Py)
                } else {
                    None
                }
            }
        }
    }

    /// True for `unix`/`win`.
    pub fn is_platform(&self) -> bool {
        matches!(self, Tag::Unix | Tag::Win)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Unix => f.write_str("unix"),
            Tag::Win => f.write_str("win"),
            Tag::Py2k => f.write_str("py2k"),
            Tag::Py3k => f.write_str("py3k"),
            Tag::Py(n) => write!(f, "py{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn parse_op(op: &str) -> Option<Self> {
        match op {
            "<" => Some(CmpOp::Lt),
            "<=" => Some(CmpOp::Le),
            ">" => Some(CmpOp::Gt),
            ">=" => Some(CmpOp::Ge),
            "==" => Some(CmpOp::Eq),
            "!=" => Some(CmpOp::Ne),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }

    fn apply(&self, lhs: u32, rhs: u32) -> bool {
        match self {
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
        }
    }
}

/// A parsed selector expression.
///
/// `And`/`Or` are flattened on construction, so `a and (b and c)` and
/// `a and b and c` parse to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Tag(Tag),
    /// `py <op> N`
    Python(CmpOp, u32),
    Not(Box<Selector>),
    And(Vec<Selector>),
    Or(Vec<Selector>),
}

impl Selector {
    /// Parses the text between the brackets of a `# [...]` comment.
    pub fn parse(text: &str) -> Result<Self, SelectorError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut parser = ExprParser { tokens, pos: 0 };
        let selector = parser.parse_or()?;

        match parser.peek() {
            None => Ok(selector),
            Some(Token::RParen) => Err(SelectorError::UnbalancedParens),
            Some(token) => Err(SelectorError::Unexpected(token.to_string())),
        }
    }

    /// Evaluates the selector for a render target.
    ///
    /// Interpreter tags are false when the context carries no Python version.
    pub fn evaluate(&self, ctx: &RenderContext) -> bool {
        match self {
            Selector::Tag(Tag::Unix) => ctx.platform.is_unix(),
            Selector::Tag(Tag::Win) => ctx.platform.is_win(),
            Selector::Tag(Tag::Py2k) => ctx.python.is_some_and(|py| py.major == 2),
            Selector::Tag(Tag::Py3k) => ctx.python.is_some_and(|py| py.major == 3),
            Selector::Tag(Tag::Py(n)) => ctx.python.is_some_and(|py| py.as_selector_int() == *n),
            Selector::Python(op, n) => ctx
                .python
                .is_some_and(|py| op.apply(py.as_selector_int(), *n)),
            Selector::Not(inner) => !inner.evaluate(ctx),
            Selector::And(parts) => parts.iter().all(|p| p.evaluate(ctx)),
            Selector::Or(parts) => parts.iter().any(|p| p.evaluate(ctx)),
        }
    }

    /// Returns every tag the expression mentions, in order of appearance.
    /// `py` comparisons are reported as `py`.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        self.collect_tags(&mut tags);
        tags
    }

    fn collect_tags(&self, tags: &mut Vec<String>) {
        match self {
            Selector::Tag(tag) => tags.push(tag.to_string()),
            Selector::Python(..) => tags.push("py".to_string()),
            Selector::Not(inner) => inner.collect_tags(tags),
            Selector::And(parts) | Selector::Or(parts) => {
                for part in parts {
                    part.collect_tags(tags);
                }
            }
        }
    }

    /// True if the expression depends on the target platform.
    pub fn is_platform_conditional(&self) -> bool {
        match self {
            Selector::Tag(tag) => tag.is_platform(),
            Selector::Python(..) => false,
            Selector::Not(inner) => inner.is_platform_conditional(),
            Selector::And(parts) | Selector::Or(parts) => {
                parts.iter().any(|p| p.is_platform_conditional())
            }
        }
    }

    /// True if the expression depends on the interpreter version.
    pub fn is_python_conditional(&self) -> bool {
        match self {
            Selector::Tag(tag) => !tag.is_platform(),
            Selector::Python(..) => true,
            Selector::Not(inner) => inner.is_python_conditional(),
            Selector::And(parts) | Selector::Or(parts) => {
                parts.iter().any(|p| p.is_python_conditional())
            }
        }
    }

    fn and(parts: Vec<Selector>) -> Selector {
        Self::combine(parts, true)
    }

    fn or(parts: Vec<Selector>) -> Selector {
        Self::combine(parts, false)
    }

    fn combine(parts: Vec<Selector>, conjunction: bool) -> Selector {
        let mut flat = Vec::with_capacity(parts.len());
        for part in parts {
            match (part, conjunction) {
                (Selector::And(inner), true) | (Selector::Or(inner), false) => flat.extend(inner),
                (other, _) => flat.push(other),
            }
        }
        if flat.len() == 1 {
            return flat.remove(0);
        }
        if conjunction {
            Selector::And(flat)
        } else {
            Selector::Or(flat)
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Tag(tag) => write!(f, "{}", tag),
            Selector::Python(op, n) => write!(f, "py{}{}", op.as_str(), n),
            Selector::Not(inner) => match inner.as_ref() {
                Selector::And(_) | Selector::Or(_) => write!(f, "not ({})", inner),
                _ => write!(f, "not {}", inner),
            },
            Selector::And(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|p| match p {
                        Selector::Or(_) => format!("({})", p),
                        _ => p.to_string(),
                    })
                    .collect();
                f.write_str(&rendered.join(" and "))
            }
            Selector::Or(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                f.write_str(&rendered.join(" or "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(String),
    Op(String),
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Number(s) | Token::Op(s) => f.write_str(s),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, SelectorError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '<' | '>' | '=' | '!' => {
                chars.next();
                let mut op = ch.to_string();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    op.push('=');
                }
                if CmpOp::parse_op(&op).is_none() {
                    return Err(SelectorError::Unexpected(op));
                }
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if word.chars().all(|c| c.is_ascii_digit()) {
                    tokens.push(Token::Number(word));
                } else {
                    tokens.push(Token::Ident(word));
                }
            }
            other => return Err(SelectorError::InvalidChar(other)),
        }
    }

    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(word)) if word == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Selector, SelectorError> {
        let mut parts = vec![self.parse_and()?];
        while self.eat_keyword("or") {
            parts.push(self.parse_and()?);
        }
        Ok(Selector::or(parts))
    }

    fn parse_and(&mut self) -> Result<Selector, SelectorError> {
        let mut parts = vec![self.parse_unary()?];
        while self.eat_keyword("and") {
            parts.push(self.parse_unary()?);
        }
        Ok(Selector::and(parts))
    }

    fn parse_unary(&mut self) -> Result<Selector, SelectorError> {
        if self.eat_keyword("not") {
            let inner = self.parse_unary()?;
            return Ok(Selector::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Selector, SelectorError> {
        match self.next() {
            None => Err(SelectorError::UnexpectedEnd),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(SelectorError::UnbalancedParens),
                }
            }
            Some(Token::RParen) => Err(SelectorError::UnbalancedParens),
            Some(Token::Ident(word)) if word == "py" => self.parse_python_comparison(),
            Some(Token::Ident(word)) => match word.as_str() {
                "and" | "or" | "not" => Err(SelectorError::Unexpected(word)),
                _ => Tag::from_ident(&word)
                    .map(Selector::Tag)
                    .ok_or(SelectorError::UnknownTag(word)),
            },
            Some(token) => Err(SelectorError::Unexpected(token.to_string())),
        }
    }

    fn parse_python_comparison(&mut self) -> Result<Selector, SelectorError> {
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            _ => return Err(SelectorError::MissingComparison),
        };
        let cmp = CmpOp::parse_op(&op).ok_or_else(|| SelectorError::Unexpected(op.clone()))?;

        match self.next() {
            Some(Token::Number(n)) => {
                let value = n.parse().map_err(|_| SelectorError::InvalidNumber {
                    op: op.clone(),
                    found: n.clone(),
                })?;
                Ok(Selector::Python(cmp, value))
            }
            Some(other) => Err(SelectorError::InvalidNumber {
                op,
                found: other.to_string(),
            }),
            None => Err(SelectorError::UnexpectedEnd),
        }
    }
}
