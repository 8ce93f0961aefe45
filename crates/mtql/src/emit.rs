//! Walks the reduced tree and streams the BSON filter document.
//!
//! Boolean grouping is encoded through reserved keys: an `or` subtree opens a
//! `$or` array of documents, a chain of same-key comparisons opens a `$and`
//! array at the carrier's position, `and` siblings are plain document
//! elements. Comparison operators become their `$`-prefixed document keys.

use bson::oid::ObjectId;

use crate::ast::{BoolOp, Expression, NodeId, Side, Tree, ValueType};
use crate::error::Error;
use crate::params::ParamMap;
use crate::writer::ValueWriter;

pub(crate) fn encode_query(
    vw: &mut ValueWriter<'_>,
    tree: &Tree,
    params: &ParamMap,
) -> Result<(), Error> {
    vw.begin_document()?;
    write_node(vw, tree, tree.root(), BoolOp::And, params)?;
    vw.end_document()
}

/// `$or: [ {` — open a clause array and its first inner document.
fn clause_start(vw: &mut ValueWriter<'_>, name: &str) -> Result<(), Error> {
    vw.document_element(name)?;
    vw.begin_array()?;
    vw.array_element()?;
    vw.begin_document()
}

/// `}, {` — close the current inner document, open the next.
fn elem_sep(vw: &mut ValueWriter<'_>) -> Result<(), Error> {
    vw.end_document()?;
    vw.array_element()?;
    vw.begin_document()
}

/// `} ]` — close the last inner document and the clause array.
fn clause_end(vw: &mut ValueWriter<'_>) -> Result<(), Error> {
    vw.end_document()?;
    vw.end_array()
}

fn write_node(
    vw: &mut ValueWriter<'_>,
    tree: &Tree,
    id: NodeId,
    parent_op: BoolOp,
    params: &ParamMap,
) -> Result<(), Error> {
    let node = tree.node(id);
    // a fresh `or` opens a $or clause; an `or` under an `or` keeps filling
    // the parent's array
    let wraps = node.op == BoolOp::Or && parent_op != BoolOp::Or;
    let separated = node.op == BoolOp::Or;

    if wraps {
        clause_start(vw, "$or")?;
    }

    write_side(vw, tree, &node.left, node.op, params)?;
    if separated && !node.right.is_empty() {
        elem_sep(vw)?;
    }
    write_side(vw, tree, &node.right, node.op, params)?;

    if wraps {
        clause_end(vw)?;
    }
    Ok(())
}

fn write_side(
    vw: &mut ValueWriter<'_>,
    tree: &Tree,
    side: &Side,
    op: BoolOp,
    params: &ParamMap,
) -> Result<(), Error> {
    match side {
        Side::Empty => Ok(()),
        Side::Node(child) => write_node(vw, tree, *child, op, params),
        Side::Expr(e) if e.links.is_empty() => encode_expression(vw, e, params),
        Side::Expr(e) => encode_linked(vw, e, params),
    }
}

/// A carrier and its links become a `$and` array of one-element documents.
fn encode_linked(
    vw: &mut ValueWriter<'_>,
    carrier: &Expression,
    params: &ParamMap,
) -> Result<(), Error> {
    clause_start(vw, "$and")?;
    encode_expression(vw, carrier, params)?;
    for link in &carrier.links {
        elem_sep(vw)?;
        encode_expression(vw, link, params)?;
    }
    clause_end(vw)
}

fn encode_expression(
    vw: &mut ValueWriter<'_>,
    e: &Expression,
    params: &ParamMap,
) -> Result<(), Error> {
    let Some(key) = e.key() else {
        return Err(Error::Emit("comparison names no document field".into()));
    };
    let key = std::str::from_utf8(key)
        .map_err(|_| Error::Emit("document field name is not UTF-8".into()))?;
    let (value, vt) = e.value();

    vw.document_element(key)?;
    if e.op == "=" {
        encode_value(vw, value, vt, params)
    } else {
        vw.begin_document()?;
        vw.document_element(op_key(&e.op))?;
        encode_value(vw, value, vt, params)?;
        vw.end_document()
    }
}

/// Map a comparison operator to its document key; `$`-operators pass
/// through unchanged.
fn op_key(op: &str) -> &str {
    match op {
        ">" => "$gt",
        "<" => "$lt",
        ">=" => "$gte",
        "<=" => "$lte",
        "=" => "$eq",
        "!=" => "$ne",
        _ => op,
    }
}

fn encode_value(
    vw: &mut ValueWriter<'_>,
    value: &[u8],
    vt: ValueType,
    params: &ParamMap,
) -> Result<(), Error> {
    // the bare literal `null` is BSON null whatever its token kind
    if value == b"null" {
        return vw.write_null();
    }

    match vt {
        ValueType::String => {
            let inner = value
                .get(1..value.len().saturating_sub(1))
                .ok_or_else(|| Error::Emit("malformed string lexeme".into()))?;
            let text = std::str::from_utf8(inner)
                .map_err(|_| Error::Emit("string value is not UTF-8".into()))?;
            if text.starts_with('$') {
                if let Some(bound) = params.get(text) {
                    return vw.write_bson(bound);
                }
            }
            vw.write_str(text)
        }
        ValueType::Integer => vw.write_i64(i64::from_be_bytes(fixed8(value)?)),
        ValueType::Float => vw.write_f64(f64::from_bits(u64::from_be_bytes(fixed8(value)?))),
        ValueType::Date => vw.write_datetime_ms(i64::from_be_bytes(fixed8(value)?)),
        ValueType::ObjectId => {
            let bytes: [u8; 12] = value
                .try_into()
                .map_err(|_| Error::Emit("invalid object id".into()))?;
            vw.write_object_id(ObjectId::from_bytes(bytes))
        }
        ValueType::Bool => vw.write_bool(value.first() == Some(&1)),
        ValueType::Regex => {
            let split = value
                .iter()
                .rposition(|&b| b == b'/')
                .filter(|&p| p > 0)
                .ok_or_else(|| Error::Emit("malformed regex lexeme".into()))?;
            let pattern = std::str::from_utf8(&value[1..split])
                .map_err(|_| Error::Emit("regex is not UTF-8".into()))?;
            let options = std::str::from_utf8(&value[split + 1..])
                .map_err(|_| Error::Emit("regex is not UTF-8".into()))?;
            vw.write_regex(pattern, options)
        }
        ValueType::Key => {
            let text = std::str::from_utf8(value)
                .map_err(|_| Error::Emit("key value is not UTF-8".into()))?;
            vw.write_str(text)
        }
        ValueType::Array => {
            vw.begin_array()?;
            let (count, mut rest) = split_at_checked(value, 4)?;
            let count = u32::from_be_bytes(fixed4(count)?);
            for _ in 0..count {
                let (tag, tail) = split_at_checked(rest, 1)?;
                let vt = ValueType::from_tag(tag[0])
                    .ok_or_else(|| Error::Emit("unknown array element type".into()))?;
                let (len, tail) = if vt.is_var_len() {
                    let (len, tail) = split_at_checked(tail, 4)?;
                    (u32::from_be_bytes(fixed4(len)?) as usize, tail)
                } else {
                    (vt.fixed_len(), tail)
                };
                let (element, tail) = split_at_checked(tail, len)?;
                rest = tail;
                vw.array_element()?;
                encode_value(vw, element, vt, params)?;
            }
            vw.end_array()
        }
    }
}

fn split_at_checked(bytes: &[u8], n: usize) -> Result<(&[u8], &[u8]), Error> {
    if bytes.len() < n {
        return Err(Error::Emit("truncated array lexeme".into()));
    }
    Ok(bytes.split_at(n))
}

fn fixed8(bytes: &[u8]) -> Result<[u8; 8], Error> {
    bytes
        .try_into()
        .map_err(|_| Error::Emit("malformed numeric lexeme".into()))
}

fn fixed4(bytes: &[u8]) -> Result<[u8; 4], Error> {
    bytes
        .try_into()
        .map_err(|_| Error::Emit("malformed length prefix".into()))
}
