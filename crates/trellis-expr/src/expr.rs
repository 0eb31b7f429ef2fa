//! Expression trees.

use serde::{Deserialize, Serialize};

use crate::token::{Token, TokenKind};

/// A scalar literal embedded in an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

/// A node of the expression tree: an operator application, a bare token,
/// or a scalar literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Expression(Box<Expression>),
    Token(Token),
    Scalar(Scalar),
}

/// An operator application: a head token and its ordered arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub op: Token,
    pub args: Vec<Node>,
}

impl Expression {
    pub fn new(op: impl Into<Token>, args: Vec<Node>) -> Self {
        Self {
            op: op.into(),
            args,
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.op.kind
    }
}

impl Node {
    pub fn null() -> Node {
        Node::Scalar(Scalar::Null)
    }

    pub fn num(n: f64) -> Node {
        Node::Scalar(Scalar::Num(n))
    }

    pub fn str(s: impl Into<String>) -> Node {
        Node::Scalar(Scalar::Str(s.into()))
    }

    pub fn bool(b: bool) -> Node {
        Node::Scalar(Scalar::Bool(b))
    }

    pub fn token(kind: TokenKind) -> Node {
        Node::Token(Token::new(kind))
    }

    pub fn as_expression(&self) -> Option<&Expression> {
        match self {
            Node::Expression(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            Node::Token(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Node::Scalar(Scalar::Num(n)) => Some(*n),
            _ => None,
        }
    }

    /// Kind of the head token, for expression and token nodes.
    pub fn head_kind(&self) -> Option<TokenKind> {
        match self {
            Node::Expression(e) => Some(e.op.kind),
            Node::Token(t) => Some(t.kind),
            Node::Scalar(_) => None,
        }
    }

    /// True for token nodes of the given kind.
    pub fn is_token(&self, kind: TokenKind) -> bool {
        matches!(self, Node::Token(t) if t.kind == kind)
    }
}

impl From<Expression> for Node {
    fn from(e: Expression) -> Self {
        Node::Expression(Box::new(e))
    }
}

impl From<Token> for Node {
    fn from(t: Token) -> Self {
        Node::Token(t)
    }
}

impl From<f64> for Node {
    fn from(n: f64) -> Self {
        Node::num(n)
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::num(n as f64)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::str(s)
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Scalar(Scalar::Str(s))
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::bool(b)
    }
}
