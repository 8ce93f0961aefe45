//! Cached extended-JSON query templates with positional parameters.
//!
//! A template like `{ "id": "$1", "start": { "$lte": "$2" } }` is decoded
//! once and cached by its source text; every use gets a fresh deep copy with
//! the `"$…"` string leaves replaced by caller-supplied values.
//!
//! ```
//! use mtql::params;
//!
//! let filter = mtql_template::parse_query(
//!     r#"{ "id": "$1" }"#,
//!     &params!["$1" => "abc"],
//! )?;
//! assert_eq!(filter, bson::bson!({ "id": "abc" }));
//! # Ok::<(), mtql_template::TemplateError>(())
//! ```

mod error;
mod marshal;

pub use error::TemplateError;
pub use marshal::{marshal_query, MarshalledQuery};

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use bson::Bson;
use mtql::{param_map, ParamMap};

static TEMPLATES: LazyLock<RwLock<HashMap<String, Bson>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Decode `source` as BSON extended JSON (cached by source text) and return
/// a copy with `[k1, v1, k2, v2, …]` parameter pairs substituted.
pub fn parse_query(source: &str, pairs: &[Bson]) -> Result<Bson, TemplateError> {
    let params = param_map(pairs)?;

    let cache = TEMPLATES.read().unwrap_or_else(|e| e.into_inner());
    if let Some(cached) = cache.get(source) {
        return Ok(substituted(cached, &params));
    }
    drop(cache);

    let mut cache = TEMPLATES.write().unwrap_or_else(|e| e.into_inner());
    // racing decoder may have won the write lock first
    if let Some(cached) = cache.get(source) {
        return Ok(substituted(cached, &params));
    }

    tracing::debug!(bytes = source.len(), "caching query template");
    let decoded = decode(source)?;
    let result = substituted(&decoded, &params);
    cache.insert(source.to_string(), decoded);
    Ok(result)
}

/// [`parse_query`], but any failure is a process fault. For static queries
/// built at program start; never call it on a request path.
pub fn must_parse_query(source: &str, pairs: &[Bson]) -> Bson {
    match parse_query(source, pairs) {
        Ok(query) => query,
        Err(e) => panic!("can not parse query {source:?}: {e}"),
    }
}

fn decode(source: &str) -> Result<Bson, TemplateError> {
    let value: serde_json::Value =
        serde_json::from_str(source).map_err(|e| TemplateError::Decode(e.to_string()))?;
    Bson::try_from(value).map_err(|e| TemplateError::Decode(e.to_string()))
}

/// Deep copy with every `"$…"` string leaf swapped for its bound value.
/// Replaced values are taken as-is; unbound `$` strings stay verbatim.
fn substituted(node: &Bson, params: &ParamMap) -> Bson {
    match node {
        Bson::Document(doc) => Bson::Document(
            doc.iter()
                .map(|(key, value)| (key.clone(), replace_or_descend(value, params)))
                .collect(),
        ),
        Bson::Array(items) => Bson::Array(
            items
                .iter()
                .map(|value| replace_or_descend(value, params))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn replace_or_descend(value: &Bson, params: &ParamMap) -> Bson {
    if let Bson::String(name) = value {
        if name.starts_with('$') {
            if let Some(bound) = params.get(name) {
                return bound.clone();
            }
        }
    }
    substituted(value, params)
}
