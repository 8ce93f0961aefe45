use bson::spec::ElementType;
use bson::{bson, doc, Bson};
use mtql::params;
use mtql_template::{marshal_query, must_parse_query, parse_query, TemplateError};

#[test]
fn parse_then_marshal_binds_once() {
    let parsed = parse_query(
        r#"{ "id": "$1", "start": { "$lte": "$2" } }"#,
        &params!["$1" => "abc", "$2" => 7],
    )
    .unwrap();

    let marshalled = marshal_query(&parsed, &[]).unwrap();
    let expected = bson::to_vec(&doc! { "id": "abc", "start": { "$lte": 7 } }).unwrap();
    assert_eq!(marshalled.marshal_bson(), expected);
    assert_eq!(marshalled.bson_type(), ElementType::EmbeddedDocument);
    marshalled.close();
}

#[test]
fn marshal_binds_late() {
    // parsed without parameters, bound at marshal time
    let parsed = must_parse_query(r#"{ "id": "$1", "n": "$2" }"#, &[]);
    let marshalled = marshal_query(&parsed, &params!["$1" => "abc", "$2" => 12]).unwrap();

    let expected = bson::to_vec(&doc! { "id": "abc", "n": 12 }).unwrap();
    assert_eq!(marshalled.marshal_bson(), expected);
}

#[test]
fn pipeline_marshals_as_indexed_document() {
    let parsed = parse_query(
        r#"[
            { "$match": { "id": "$1" } },
            { "$limit": "$2" }
        ]"#,
        &params!["$1" => "abc", "$2" => 12],
    )
    .unwrap();

    let marshalled = marshal_query(&parsed, &[]).unwrap();
    let expected = bson::to_vec(&doc! {
        "0": { "$match": { "id": "abc" } },
        "1": { "$limit": 12 },
    })
    .unwrap();
    assert_eq!(marshalled.marshal_bson(), expected);
    assert_eq!(marshalled.bson_type(), ElementType::Array);
}

#[test]
fn pipeline_bytes_decode_as_an_array_value() {
    let parsed = parse_query(r#"[ { "$limit": 5 } ]"#, &[]).unwrap();
    let marshalled = marshal_query(&parsed, &[]).unwrap();

    // an array value shares the document layout, keyed by decimal indices
    let raw = bson::RawDocument::from_bytes(marshalled.marshal_bson()).unwrap();
    let stage = raw.get("0").unwrap().unwrap();
    assert_eq!(stage.element_type(), ElementType::EmbeddedDocument);
}

#[test]
fn unbound_parameters_marshal_verbatim() {
    let parsed = parse_query(r#"{ "id": "$1" }"#, &[]).unwrap();
    let marshalled = marshal_query(&parsed, &[]).unwrap();

    let expected = bson::to_vec(&doc! { "id": "$1" }).unwrap();
    assert_eq!(marshalled.marshal_bson(), expected);
}

#[test]
fn scalar_query_is_an_error() {
    let err = marshal_query(&Bson::Int32(5), &[]).unwrap_err();
    assert!(matches!(err, TemplateError::Emit(_)));
}

#[test]
fn non_document_stage_is_an_error() {
    let parsed = bson!([ "not a stage" ]);
    let err = marshal_query(&parsed, &[]).unwrap_err();
    assert!(matches!(err, TemplateError::Emit(_)));
}

#[test]
fn extended_json_types_survive_the_template() {
    let parsed = parse_query(
        r#"{ "when": { "$date": "2022-01-01T00:00:00Z" }, "who": { "$oid": "507f191e810c19729de860ea" } }"#,
        &[],
    )
    .unwrap();

    let when = bson::DateTime::parse_rfc3339_str("2022-01-01T00:00:00Z").unwrap();
    let who = bson::oid::ObjectId::parse_str("507f191e810c19729de860ea").unwrap();
    assert_eq!(parsed, bson!({ "when": when, "who": who }));

    let marshalled = marshal_query(&parsed, &[]).unwrap();
    let expected = bson::to_vec(&doc! { "when": when, "who": who }).unwrap();
    assert_eq!(marshalled.marshal_bson(), expected);
}

#[test]
fn repeated_marshal_is_deterministic() {
    let parsed = parse_query(r#"{ "a": 1, "b": [1, 2, { "c": "$x" }] }"#, &[]).unwrap();
    let first = marshal_query(&parsed, &params!["$x" => true]).unwrap();
    let second = marshal_query(&parsed, &params!["$x" => true]).unwrap();
    assert_eq!(first.marshal_bson(), second.marshal_bson());
}
