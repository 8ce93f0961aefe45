//! Recursive-descent parser for the text filter language.
//!
//! Parsing keeps a current node inside a sentinel-rooted arena. `and` grows
//! the chain downward, `or` rotates the span owned by the nearest
//! parenthesis pin to the left, so `and` binds tighter without an explicit
//! precedence table.

use std::io::Read;

use crate::ast::{self, BoolOp, Expression, Node, NodeId, Side, Tree, ValueType};
use crate::error::Error;
use crate::scanner::{Scanner, TokenKind};

const KEY_AND: &[u8] = b"and";
const KEY_OR: &[u8] = b"or";
const FUNC_DATE: &[u8] = b"ISODate";
const FUNC_OBJECT_ID: &[u8] = b"ObjectId";

pub(crate) struct Parser<R> {
    scanner: Scanner<R>,
}

impl<R: Read> Parser<R> {
    pub fn new(scanner: Scanner<R>) -> Self {
        Parser { scanner }
    }

    pub fn parse(mut self) -> Result<Tree, Error> {
        let mut tree = Tree::new();

        let sentinel = tree.push(Node {
            group_root: true,
            ..Node::new(BoolOp::And, None)
        });
        let first = tree.push(Node::new(BoolOp::And, Some(sentinel)));
        tree.node_mut(sentinel).left = Side::Node(first);

        let mut current = first;
        while let Some(next) = self.step(&mut tree, current)? {
            current = next;
        }

        let root = match tree.side(sentinel, ast::SideSel::Left) {
            Side::Node(id) => *id,
            _ => return Err(self.position_error("empty query")),
        };
        tree.node_mut(root).parent = None;
        tree.set_root(root);

        ast::link(&mut tree);
        ast::reduce(&mut tree);

        let reduced = tree.node(tree.root());
        if reduced.left.is_empty() && reduced.right.is_empty() {
            return Err(self.position_error("empty query"));
        }

        Ok(tree)
    }

    /// Consume one token and return the node that becomes current, or `None`
    /// at end of input.
    fn step(&mut self, tree: &mut Tree, current: NodeId) -> Result<Option<NodeId>, Error> {
        if !self.scanner.advance()? {
            return Ok(None);
        }

        let kind = self.scanner.kind();
        match kind {
            TokenKind::Key
            | TokenKind::Number
            | TokenKind::String
            | TokenKind::Regex
            | TokenKind::Bool => {
                let lexeme = self.scanner.lexeme();

                if kind == TokenKind::Key && lexeme.eq_ignore_ascii_case(KEY_AND) {
                    if tree.node(current).left.is_empty() {
                        return Err(self.unexpected_symbol());
                    }
                    let child = tree.push(Node::new(BoolOp::And, Some(current)));
                    tree.set_next_node(current, child);
                    return Ok(Some(child));
                }

                if kind == TokenKind::Key && lexeme.eq_ignore_ascii_case(KEY_OR) {
                    if tree.node(current).left.is_empty() {
                        return Err(self.unexpected_symbol());
                    }
                    return Ok(Some(self.rotate_or(tree, current)?));
                }

                let lexeme = lexeme.to_vec();
                let expr = self.parse_expression(kind, lexeme)?;
                tree.set_next_expression(current, expr);
                Ok(Some(current))
            }
            TokenKind::Bracket if self.scanner.lexeme() == b"(" => {
                let child = tree.push(Node::new(BoolOp::And, Some(current)));
                tree.set_next_node(current, child);
                tree.node_mut(current).group_root = true;
                Ok(Some(child))
            }
            TokenKind::Bracket if self.scanner.lexeme() == b")" => {
                let parent = tree.node(current).parent;
                match parent {
                    Some(p) if tree.node(p).parent.is_some() => Ok(Some(p)),
                    _ => Err(self.unexpected_symbol()),
                }
            }
            _ => Err(self.unexpected_symbol()),
        }
    }

    /// Left-rotate at the nearest enclosing parenthesis pin: the pinned
    /// node's subtree on the path to `current` becomes the left child of a
    /// fresh `or` node spliced into its place.
    fn rotate_or(&self, tree: &mut Tree, current: NodeId) -> Result<NodeId, Error> {
        let mut child = current;
        let mut cursor = tree.node(current).parent;

        let group = loop {
            let Some(id) = cursor else {
                return Err(self.unexpected_symbol());
            };
            if tree.node(id).group_root {
                break id;
            }
            child = id;
            cursor = tree.node(id).parent;
        };

        let or_node = tree.push(Node {
            left: Side::Node(child),
            ..Node::new(BoolOp::Or, Some(group))
        });
        tree.node_mut(child).parent = Some(or_node);
        tree.replace_child(group, child, or_node);
        Ok(or_node)
    }

    fn parse_expression(&mut self, kind: TokenKind, lexeme: Vec<u8>) -> Result<Expression, Error> {
        let (l, lt) = self.token_value(kind, lexeme)?;

        if !self.scanner.advance()? {
            return Err(self.position_error("unexpected end of expression"));
        }
        let op_kind = self.scanner.kind();
        let op_lexeme = self.scanner.lexeme();
        let is_op = op_kind == TokenKind::Operator
            || (op_kind == TokenKind::Key && op_lexeme.first() == Some(&b'$'));
        if !is_op {
            return Err(self.unexpected_symbol());
        }
        let op = String::from_utf8_lossy(op_lexeme).into_owned();

        let (r, rt) = if op == "$in" {
            self.read_array()?
        } else {
            let (kind, lexeme) = self.read_value_token()?;
            self.token_value(kind, lexeme)?
        };

        let expr = Expression {
            op,
            l,
            lt,
            r,
            rt,
            links: Vec::new(),
        };
        if expr.key().is_none() {
            return Err(self.position_error("comparison names no document field"));
        }
        Ok(expr)
    }

    /// Read one primitive-or-key token for a comparison side or an array
    /// element.
    fn read_value_token(&mut self) -> Result<(TokenKind, Vec<u8>), Error> {
        if !self.scanner.advance()? {
            return Err(self.position_error("unexpected end of expression"));
        }
        match self.scanner.kind() {
            kind @ (TokenKind::Key
            | TokenKind::Number
            | TokenKind::String
            | TokenKind::Regex
            | TokenKind::Bool) => Ok((kind, self.scanner.lexeme().to_vec())),
            _ => Err(self.unexpected_symbol()),
        }
    }

    /// Convert a value token into its binary lexeme.
    fn token_value(&mut self, kind: TokenKind, lexeme: Vec<u8>) -> Result<(Vec<u8>, ValueType), Error> {
        match kind {
            TokenKind::String => Ok((lexeme, ValueType::String)),
            TokenKind::Regex => Ok((lexeme, ValueType::Regex)),
            TokenKind::Number => self.parse_number(&lexeme),
            TokenKind::Bool => {
                let truthy = matches!(lexeme.first(), Some(b't' | b'T'));
                Ok((vec![u8::from(truthy)], ValueType::Bool))
            }
            TokenKind::Key if lexeme == FUNC_OBJECT_ID => self.parse_func_object_id(),
            TokenKind::Key if lexeme == FUNC_DATE => self.parse_func_date(),
            TokenKind::Key => Ok((lexeme, ValueType::Key)),
            _ => Err(self.unexpected_symbol()),
        }
    }

    fn parse_number(&self, lexeme: &[u8]) -> Result<(Vec<u8>, ValueType), Error> {
        let text = std::str::from_utf8(lexeme)
            .map_err(|_| self.position_error("malformed number"))?;

        if lexeme.contains(&b'.') {
            let value: f64 = text
                .parse()
                .map_err(|e| self.position_error(&format!("bad number {text}: {e}")))?;
            Ok((value.to_bits().to_be_bytes().to_vec(), ValueType::Float))
        } else {
            let value: i64 = text
                .parse()
                .map_err(|e| self.position_error(&format!("bad number {text}: {e}")))?;
            Ok(((value as u64).to_be_bytes().to_vec(), ValueType::Integer))
        }
    }

    /// `ObjectId("…24 hex chars…")` → 12 raw bytes.
    fn parse_func_object_id(&mut self) -> Result<(Vec<u8>, ValueType), Error> {
        let payload = self.read_call_payload()?;
        let text = std::str::from_utf8(&payload)
            .map_err(|_| self.position_error("bad object id"))?;
        let oid = bson::oid::ObjectId::parse_str(text)
            .map_err(|e| self.position_error(&format!("bad object id {text}: {e}")))?;
        Ok((oid.bytes().to_vec(), ValueType::ObjectId))
    }

    /// `ISODate("…RFC 3339…")` → 8 big-endian bytes of Unix milliseconds.
    fn parse_func_date(&mut self) -> Result<(Vec<u8>, ValueType), Error> {
        let payload = self.read_call_payload()?;
        let text = std::str::from_utf8(&payload)
            .map_err(|_| self.position_error("bad date"))?;
        let date = bson::DateTime::parse_rfc3339_str(text)
            .map_err(|e| self.position_error(&format!("bad date {text}: {e}")))?;
        let millis = date.timestamp_millis();
        Ok(((millis as u64).to_be_bytes().to_vec(), ValueType::Date))
    }

    /// Read `( "payload" )` and return the unquoted payload bytes.
    fn read_call_payload(&mut self) -> Result<Vec<u8>, Error> {
        self.expect_bracket(b'(')?;

        if !self.scanner.advance()? {
            return Err(self.position_error("unexpected end of expression"));
        }
        if self.scanner.kind() != TokenKind::String {
            return Err(self.unexpected_symbol());
        }
        let lexeme = self.scanner.lexeme();
        let payload = lexeme
            .get(1..lexeme.len().saturating_sub(1))
            .unwrap_or_default()
            .to_vec();

        self.expect_bracket(b')')?;
        Ok(payload)
    }

    fn expect_bracket(&mut self, symbol: u8) -> Result<(), Error> {
        if !self.scanner.advance()? {
            return Err(self.position_error("unexpected end of expression"));
        }
        if self.scanner.kind() != TokenKind::Bracket || self.scanner.lexeme() != &[symbol][..] {
            return Err(self.unexpected_symbol());
        }
        Ok(())
    }

    /// Read the packed `$in` array literal: `[ value (, value)* ]`.
    fn read_array(&mut self) -> Result<(Vec<u8>, ValueType), Error> {
        self.expect_bracket(b'[')?;

        let mut packed = vec![0u8; 4];
        let mut count: u32 = 0;

        loop {
            let (kind, lexeme) = self.read_value_token()?;
            let (value, vt) = self.token_value(kind, lexeme)?;

            packed.push(vt as u8);
            if vt.is_var_len() {
                packed.extend_from_slice(&(value.len() as u32).to_be_bytes());
            }
            packed.extend_from_slice(&value);
            count += 1;

            if !self.scanner.advance()? {
                return Err(self.position_error("unexpected end of array"));
            }
            match (self.scanner.kind(), self.scanner.lexeme()) {
                (TokenKind::Comma, _) => {}
                (TokenKind::Bracket, b"]") => break,
                _ => return Err(self.unexpected_symbol()),
            }
        }

        packed[..4].copy_from_slice(&count.to_be_bytes());
        Ok((packed, ValueType::Array))
    }

    fn position_error(&self, message: &str) -> Error {
        let (line, column) = self.scanner.position();
        Error::Parse {
            line,
            column,
            message: message.to_string(),
        }
    }

    fn unexpected_symbol(&self) -> Error {
        let (line, column) = self.scanner.position();
        Error::Parse {
            line,
            column,
            message: format!(
                "unexpected symbol {}",
                String::from_utf8_lossy(self.scanner.lexeme())
            ),
        }
    }
}
