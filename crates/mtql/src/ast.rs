//! The boolean-comparison tree built by the parser.
//!
//! Nodes live in an arena owned by [`Tree`]; child links are arena indices
//! and parent indices are the non-owning back-pointers the parser needs for
//! `)` pops and `or` rotation. After [`link`] and [`reduce`] the tree is
//! read-only and only walked downward.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Binary form of a comparison operand. The discriminant doubles as the
/// element tag inside packed array lexemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ValueType {
    /// Raw identifier bytes naming a document field.
    Key = 1,
    /// 8-byte big-endian two's-complement integer.
    Integer = 2,
    /// 8-byte big-endian IEEE-754 bit pattern.
    Float = 3,
    /// Original bytes including the surrounding quotes.
    String = 4,
    /// Original bytes including `/…/` and trailing option letters.
    Regex = 5,
    /// 8-byte big-endian Unix milliseconds.
    Date = 6,
    /// 12 raw bytes.
    ObjectId = 7,
    /// Single byte, 0 or 1.
    Bool = 8,
    /// 4-byte big-endian element count, then tagged elements.
    Array = 9,
}

impl ValueType {
    pub fn from_tag(tag: u8) -> Option<ValueType> {
        match tag {
            1 => Some(ValueType::Key),
            2 => Some(ValueType::Integer),
            3 => Some(ValueType::Float),
            4 => Some(ValueType::String),
            5 => Some(ValueType::Regex),
            6 => Some(ValueType::Date),
            7 => Some(ValueType::ObjectId),
            8 => Some(ValueType::Bool),
            9 => Some(ValueType::Array),
            _ => None,
        }
    }

    /// Kinds stored with a 4-byte length prefix inside packed arrays.
    pub fn is_var_len(self) -> bool {
        matches!(self, ValueType::Key | ValueType::String | ValueType::Regex)
    }

    /// Payload size of fixed-length kinds inside packed arrays.
    pub fn fixed_len(self) -> usize {
        match self {
            ValueType::Integer | ValueType::Float | ValueType::Date => 8,
            ValueType::ObjectId => 12,
            ValueType::Bool => 1,
            _ => 0,
        }
    }
}

/// A single comparison. One side names a document field (`ValueType::Key`);
/// `links` holds same-key siblings gathered by [`link`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expression {
    pub op: String,
    pub l: Vec<u8>,
    pub lt: ValueType,
    pub r: Vec<u8>,
    pub rt: ValueType,
    pub links: Vec<Expression>,
}

impl Expression {
    /// The side naming the document field, left side first.
    pub fn key(&self) -> Option<&[u8]> {
        if self.lt == ValueType::Key {
            Some(&self.l)
        } else if self.rt == ValueType::Key {
            Some(&self.r)
        } else {
            None
        }
    }

    /// The compared value: the non-key side, or the right side when both
    /// sides are keys.
    pub fn value(&self) -> (&[u8], ValueType) {
        if self.lt != ValueType::Key {
            (&self.l, self.lt)
        } else {
            (&self.r, self.rt)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeId(usize);

#[derive(Debug)]
pub(crate) enum Side {
    Empty,
    Expr(Expression),
    Node(NodeId),
}

impl Side {
    pub fn is_empty(&self) -> bool {
        matches!(self, Side::Empty)
    }

    fn child(&self) -> Option<NodeId> {
        match self {
            Side::Node(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SideSel {
    Left,
    Right,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub op: BoolOp,
    pub left: Side,
    pub right: Side,
    pub parent: Option<NodeId>,
    /// Pin for a parenthesised group; `or` rotates at the nearest pinned
    /// ancestor.
    pub group_root: bool,
}

impl Node {
    pub fn new(op: BoolOp, parent: Option<NodeId>) -> Node {
        Node {
            op,
            left: Side::Empty,
            right: Side::Empty,
            parent,
            group_root: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    pub fn new() -> Tree {
        Tree {
            nodes: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = id;
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn side(&self, id: NodeId, sel: SideSel) -> &Side {
        match sel {
            SideSel::Left => &self.nodes[id.0].left,
            SideSel::Right => &self.nodes[id.0].right,
        }
    }

    pub fn side_mut(&mut self, id: NodeId, sel: SideSel) -> &mut Side {
        match sel {
            SideSel::Left => &mut self.nodes[id.0].left,
            SideSel::Right => &mut self.nodes[id.0].right,
        }
    }

    /// Attach an expression to the first free slot, left first.
    pub fn set_next_expression(&mut self, id: NodeId, expr: Expression) {
        let node = self.node_mut(id);
        if node.left.is_empty() {
            node.left = Side::Expr(expr);
        } else {
            node.right = Side::Expr(expr);
        }
    }

    /// Attach a child node to the first free slot, left first.
    pub fn set_next_node(&mut self, id: NodeId, child: NodeId) {
        let node = self.node_mut(id);
        if node.left.is_empty() {
            node.left = Side::Node(child);
        } else {
            node.right = Side::Node(child);
        }
    }

    /// Swap the child slot holding `old` for `new`.
    pub fn replace_child(&mut self, id: NodeId, old: NodeId, new: NodeId) {
        let node = self.node_mut(id);
        if let Side::Node(c) = node.left {
            if c.0 == old.0 {
                node.left = Side::Node(new);
                return;
            }
        }
        if let Side::Node(c) = node.right {
            if c.0 == old.0 {
                node.right = Side::Node(new);
            }
        }
    }
}

// ── Link pass ───────────────────────────────────────────────────

type LinkMap = HashMap<Vec<u8>, (NodeId, SideSel)>;

/// Gather comparisons on the same key within an `and` scope onto the first
/// one seen, so the emitter can frame them as a `$and` array instead of
/// letting a later document key clobber an earlier one.
pub(crate) fn link(tree: &mut Tree) {
    let mut map = LinkMap::new();
    link_node(tree, tree.root(), &mut map);
}

fn link_node(tree: &mut Tree, id: NodeId, map: &mut LinkMap) {
    link_side(tree, id, SideSel::Left, map);
    link_side(tree, id, SideSel::Right, map);

    let op = tree.node(id).op;
    let left_child = tree.node(id).left.child();
    let right_child = tree.node(id).right.child();

    // an `or` boundary starts a fresh scope for each child
    if let Some(child) = left_child {
        if op == BoolOp::Or {
            link_node(tree, child, &mut LinkMap::new());
        } else {
            link_node(tree, child, map);
        }
    }
    if let Some(child) = right_child {
        if op == BoolOp::Or {
            link_node(tree, child, &mut LinkMap::new());
        } else {
            link_node(tree, child, map);
        }
    }
}

fn link_side(tree: &mut Tree, id: NodeId, sel: SideSel, map: &mut LinkMap) {
    let key = match tree.side(id, sel) {
        Side::Expr(e) => match e.key() {
            Some(k) => k.to_vec(),
            None => return,
        },
        _ => return,
    };

    match map.entry(key) {
        Entry::Occupied(entry) => {
            let (carrier_id, carrier_sel) = *entry.get();
            let taken = std::mem::replace(tree.side_mut(id, sel), Side::Empty);
            let Side::Expr(expr) = taken else { return };
            if let Side::Expr(carrier) = tree.side_mut(carrier_id, carrier_sel) {
                carrier.links.push(expr);
            }
        }
        Entry::Vacant(slot) => {
            slot.insert((id, sel));
        }
    }
}

// ── Reduce pass ─────────────────────────────────────────────────

/// Collapse the empty cells left behind by parsing and linking: a node with
/// two empty sides vanishes, a node with one non-empty side is replaced by
/// that side. A query that reduces to a single expression keeps its root
/// node as the carrier.
pub(crate) fn reduce(tree: &mut Tree) {
    match reduce_node(tree, tree.root()) {
        Side::Node(id) => {
            tree.node_mut(id).parent = None;
            tree.set_root(id);
        }
        Side::Expr(expr) => {
            let root = tree.root();
            tree.node_mut(root).left = Side::Expr(expr);
            tree.node_mut(root).right = Side::Empty;
        }
        Side::Empty => {}
    }
}

fn reduce_node(tree: &mut Tree, id: NodeId) -> Side {
    for sel in [SideSel::Left, SideSel::Right] {
        if let Some(child) = tree.side(id, sel).child() {
            let collapsed = reduce_node(tree, child);
            if let Side::Node(c) = &collapsed {
                tree.node_mut(*c).parent = Some(id);
            }
            *tree.side_mut(id, sel) = collapsed;
        }
    }

    let node = tree.node(id);
    match (node.left.is_empty(), node.right.is_empty()) {
        (true, true) => Side::Empty,
        (false, false) => Side::Node(id),
        (false, true) => std::mem::replace(tree.side_mut(id, SideSel::Left), Side::Empty),
        (true, false) => std::mem::replace(tree.side_mut(id, SideSel::Right), Side::Empty),
    }
}

// ── Test rendering ──────────────────────────────────────────────

#[cfg(test)]
pub(crate) fn render(tree: &Tree) -> String {
    render_node(tree, tree.root())
}

#[cfg(test)]
fn render_node(tree: &Tree, id: NodeId) -> String {
    let node = tree.node(id);
    let op = match node.op {
        BoolOp::And => "and",
        BoolOp::Or => "or",
    };
    format!(
        "({} {op} {})",
        render_side(tree, &node.left),
        render_side(tree, &node.right)
    )
}

#[cfg(test)]
fn render_side(tree: &Tree, side: &Side) -> String {
    match side {
        Side::Empty => "_".to_string(),
        Side::Expr(e) => render_expr(e),
        Side::Node(id) => render_node(tree, *id),
    }
}

#[cfg(test)]
fn render_expr(e: &Expression) -> String {
    let mut out = format!(
        "{}{}{}",
        render_value(&e.l, e.lt),
        e.op,
        render_value(&e.r, e.rt)
    );
    if !e.links.is_empty() {
        let links: Vec<String> = e.links.iter().map(render_expr).collect();
        out.push_str(&format!("+[{}]", links.join(", ")));
    }
    out
}

#[cfg(test)]
fn render_value(v: &[u8], vt: ValueType) -> String {
    match vt {
        ValueType::Key => format!("k:{}", String::from_utf8_lossy(v)),
        ValueType::Integer => {
            format!("i:{}", i64::from_be_bytes(v.try_into().unwrap()))
        }
        ValueType::Float => format!(
            "f:{}",
            f64::from_bits(u64::from_be_bytes(v.try_into().unwrap()))
        ),
        ValueType::String => format!("s:{}", String::from_utf8_lossy(v)),
        ValueType::Regex => format!("r:{}", String::from_utf8_lossy(v)),
        ValueType::Date => format!("d:{}", i64::from_be_bytes(v.try_into().unwrap())),
        ValueType::ObjectId => {
            let hex: String = v.iter().map(|b| format!("{b:02x}")).collect();
            format!("o:{hex}")
        }
        ValueType::Bool => format!("b:{}", v.first() == Some(&1)),
        ValueType::Array => {
            let count = u32::from_be_bytes(v[..4].try_into().unwrap());
            let mut parts = Vec::new();
            let mut rest = &v[4..];
            for _ in 0..count {
                let vt = ValueType::from_tag(rest[0]).unwrap();
                rest = &rest[1..];
                let len = if vt.is_var_len() {
                    let l = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
                    rest = &rest[4..];
                    l
                } else {
                    vt.fixed_len()
                };
                parts.push(render_value(&rest[..len], vt));
                rest = &rest[len..];
            }
            format!("a:[{}]", parts.join(", "))
        }
    }
}
