//! Streams a parsed template into a pooled buffer.

use bson::spec::ElementType;
use bson::{Bson, Document};
use mtql::writer::ValueWriter;
use mtql::{param_map, ParamMap, PooledBuffer};

use crate::error::TemplateError;

/// Serialize a query or pipeline, binding `[k1, v1, …]` parameter pairs
/// during the write so a template parsed without parameters can be bound
/// late.
///
/// A top-level array is a pipeline: its stages become the elements `"0"`,
/// `"1"`, … of a document whose bytes double as a BSON array value.
pub fn marshal_query(query: &Bson, pairs: &[Bson]) -> Result<MarshalledQuery, TemplateError> {
    let params = param_map(pairs)?;

    let mut buf = mtql::acquire();
    let mut vw = ValueWriter::new(&mut buf);

    let pipeline = matches!(query, Bson::Array(_));
    match query {
        Bson::Array(stages) => encode_pipeline(&mut vw, stages, &params)?,
        Bson::Document(doc) => encode_document(&mut vw, doc, &params)?,
        other => {
            return Err(TemplateError::Emit(format!(
                "query must be a document or a pipeline, got {:?}",
                other.element_type()
            )));
        }
    }
    vw.finish()?;

    Ok(MarshalledQuery { buf, pipeline })
}

fn encode_pipeline(
    vw: &mut ValueWriter<'_>,
    stages: &[Bson],
    params: &ParamMap,
) -> Result<(), TemplateError> {
    vw.begin_document()?;
    for (index, stage) in stages.iter().enumerate() {
        let Bson::Document(doc) = stage else {
            return Err(TemplateError::Emit(format!(
                "pipeline stage {index} must be a document"
            )));
        };
        vw.document_element(&index.to_string())?;
        encode_document(vw, doc, params)?;
    }
    vw.end_document()?;
    Ok(())
}

fn encode_document(
    vw: &mut ValueWriter<'_>,
    doc: &Document,
    params: &ParamMap,
) -> Result<(), TemplateError> {
    vw.begin_document()?;
    for (key, value) in doc {
        vw.document_element(key)?;
        encode_value(vw, value, params)?;
    }
    vw.end_document()?;
    Ok(())
}

fn encode_value(
    vw: &mut ValueWriter<'_>,
    value: &Bson,
    params: &ParamMap,
) -> Result<(), TemplateError> {
    // late parameter binding happens here, during the stream-out
    if let Bson::String(name) = value {
        if name.starts_with('$') {
            if let Some(bound) = params.get(name) {
                return Ok(vw.write_bson(bound)?);
            }
        }
    }
    match value {
        Bson::Document(doc) => encode_document(vw, doc, params),
        Bson::Array(items) => {
            vw.begin_array()?;
            for item in items {
                vw.array_element()?;
                encode_value(vw, item, params)?;
            }
            vw.end_array()?;
            Ok(())
        }
        other => Ok(vw.write_bson(other)?),
    }
}

/// A serialized query or pipeline backed by a pooled buffer.
#[derive(Debug)]
pub struct MarshalledQuery {
    buf: PooledBuffer,
    pipeline: bool,
}

impl MarshalledQuery {
    /// The raw BSON bytes.
    pub fn marshal_bson(&self) -> &[u8] {
        &self.buf
    }

    /// Value type to advertise when embedding: pipelines are arrays, which
    /// share the document byte layout.
    pub fn bson_type(&self) -> ElementType {
        if self.pipeline {
            ElementType::Array
        } else {
            ElementType::EmbeddedDocument
        }
    }

    /// Hand the backing buffer back to the pool. Dropping has the same
    /// effect.
    pub fn close(self) {}
}
