//! Compiles compact text filters into MongoDB-ready BSON query documents.
//!
//! A filter like `age >= 21 and (plan = "pro" or credits > 0)` is scanned,
//! parsed into a boolean tree, normalised (same-key comparisons are gathered
//! so one document key cannot clobber another) and streamed out as the exact
//! bytes a driver would produce for the equivalent typed document.
//!
//! ```
//! let ready = mtql::prepare(r#"age >= "$min" and status = "active""#)?;
//! let query = ready.compile(&mtql::params!["$min" => 21])?;
//! assert!(!query.marshal_bson().is_empty());
//! # Ok::<(), mtql::Error>(())
//! ```
//!
//! [`prepare`] once at start-up, then [`PreparedQuery::compile`] per request
//! — the prepared tree is immutable and shareable across threads, and each
//! compile writes into a pooled buffer that [`CompiledQuery::discard`] (or a
//! plain drop) hands back.

mod ast;
mod emit;
mod error;
mod params;
mod parser;
mod pool;
mod scanner;
pub mod writer;

pub use bson::Bson;
pub use error::Error;
pub use params::{param_map, ParamMap};
pub use pool::{acquire, PooledBuffer};

use parser::Parser;
use scanner::Scanner;

/// Parse, link and reduce a filter once for repeated compilation.
pub fn prepare(source: &str) -> Result<PreparedQuery, Error> {
    tracing::trace!(bytes = source.len(), "preparing query");
    let parser = Parser::new(Scanner::new(source.as_bytes()));
    Ok(PreparedQuery {
        tree: parser.parse()?,
    })
}

/// [`prepare`], but any failure is a process fault. For static queries built
/// at program start; never call it on a request path.
pub fn must_prepare(source: &str) -> PreparedQuery {
    match prepare(source) {
        Ok(query) => query,
        Err(e) => panic!("can not prepare query {source:?}: {e}"),
    }
}

/// One-shot [`prepare`] + [`PreparedQuery::compile`].
pub fn compile(source: &str, pairs: &[Bson]) -> Result<CompiledQuery, Error> {
    prepare(source)?.compile(pairs)
}

/// [`compile`], but any failure is a process fault. For static queries built
/// at program start; never call it on a request path.
pub fn must_compile(source: &str, pairs: &[Bson]) -> CompiledQuery {
    match compile(source, pairs) {
        Ok(query) => query,
        Err(e) => panic!("can not compile query {source:?}: {e}"),
    }
}

/// A parsed filter. Immutable, cheap to share, compiled many times with
/// different parameters.
#[derive(Debug)]
pub struct PreparedQuery {
    tree: ast::Tree,
}

impl PreparedQuery {
    /// Bind `[k1, v1, k2, v2, …]` parameter pairs and stream the filter into
    /// a pooled buffer.
    pub fn compile(&self, pairs: &[Bson]) -> Result<CompiledQuery, Error> {
        let map = params::param_map(pairs)?;

        let mut buf = pool::acquire();
        let mut vw = writer::ValueWriter::new(&mut buf);
        emit::encode_query(&mut vw, &self.tree, &map)?;
        vw.finish()?;

        Ok(CompiledQuery { buf })
    }
}

/// A compiled filter backed by a pooled buffer.
#[derive(Debug)]
pub struct CompiledQuery {
    buf: pool::PooledBuffer,
}

impl CompiledQuery {
    /// The raw bytes of the filter document.
    pub fn marshal_bson(&self) -> &[u8] {
        &self.buf
    }

    /// Hand the backing buffer back to the pool. Dropping the query has the
    /// same effect.
    pub fn discard(self) {}
}
