use bson::oid::ObjectId;
use bson::{doc, Bson, DateTime, Document, Regex};
use mtql::params;

/// Reference bytes: what the codec produces for the equivalent typed
/// document.
fn marshal(doc: &Document) -> Vec<u8> {
    bson::to_vec(doc).unwrap()
}

fn compiled(source: &str, pairs: &[Bson]) -> Vec<u8> {
    let query = mtql::compile(source, pairs).unwrap();
    let bytes = query.marshal_bson().to_vec();
    query.discard();
    bytes
}

fn regex(pattern: &str, options: &str) -> Bson {
    Bson::RegularExpression(Regex {
        pattern: pattern.into(),
        options: options.into(),
    })
}

fn date(text: &str) -> DateTime {
    DateTime::parse_rfc3339_str(text).unwrap()
}

// ── Single comparisons ──────────────────────────────────────────

#[test]
fn simple_number() {
    assert_eq!(compiled("a = 90", &[]), marshal(&doc! { "a": 90_i64 }));
}

#[test]
fn simple_float() {
    assert_eq!(compiled("a = 0.89", &[]), marshal(&doc! { "a": 0.89 }));
}

#[test]
fn operator_rewrite() {
    assert_eq!(
        compiled(r#"a.c > "abc""#, &[]),
        marshal(&doc! { "a.c": { "$gt": "abc" } })
    );
    assert_eq!(
        compiled(r#"a.c < 'abc'"#, &[]),
        marshal(&doc! { "a.c": { "$lt": "abc" } })
    );
    assert_eq!(
        compiled(r#"a.c >= "abc""#, &[]),
        marshal(&doc! { "a.c": { "$gte": "abc" } })
    );
    assert_eq!(
        compiled(r#"a.c <= "abc""#, &[]),
        marshal(&doc! { "a.c": { "$lte": "abc" } })
    );
    assert_eq!(
        compiled("a != 4", &[]),
        marshal(&doc! { "a": { "$ne": 4_i64 } })
    );
}

#[test]
fn simple_regex() {
    assert_eq!(
        compiled("a.c $regex /abc/", &[]),
        marshal(&doc! { "a.c": { "$regex": regex("abc", "") } })
    );
}

#[test]
fn regex_with_options() {
    // decode-compare: option letters must survive in source order
    let bytes = compiled("a.c $regex /abc/ig", &[]);
    let decoded = Document::from_reader(&mut std::io::Cursor::new(&bytes)).unwrap();
    assert_eq!(decoded, doc! { "a.c": { "$regex": regex("abc", "ig") } });
}

#[test]
fn simple_date() {
    assert_eq!(
        compiled("a.c > ISODate('2022-01-01T00:00:00Z')", &[]),
        marshal(&doc! { "a.c": { "$gt": date("2022-01-01T00:00:00Z") } })
    );
}

#[test]
fn simple_object_id() {
    let oid = ObjectId::parse_str("507f191e810c19729de860ea").unwrap();
    assert_eq!(
        compiled(r#"a = ObjectId("507f191e810c19729de860ea")"#, &[]),
        marshal(&doc! { "a": oid })
    );
}

#[test]
fn exists_passthrough() {
    assert_eq!(
        compiled("child $exists true", &[]),
        marshal(&doc! { "child": { "$exists": true } })
    );
    assert_eq!(
        compiled("child $exists false", &[]),
        marshal(&doc! { "child": { "$exists": false } })
    );
}

#[test]
fn unknown_dollar_operator_passes_through() {
    assert_eq!(
        compiled("a $size 3", &[]),
        marshal(&doc! { "a": { "$size": 3_i64 } })
    );
}

#[test]
fn null_literal() {
    assert_eq!(compiled("a = null", &[]), marshal(&doc! { "a": Bson::Null }));
}

#[test]
fn key_on_the_right() {
    assert_eq!(
        compiled(r#""some" = f"#, &[]),
        marshal(&doc! { "f": "some" })
    );
}

// ── Boolean structure ───────────────────────────────────────────

#[test]
fn and_emits_siblings() {
    assert_eq!(
        compiled("a.c < 'abc' and e = 90", &[]),
        marshal(&doc! { "a.c": { "$lt": "abc" }, "e": 90_i64 })
    );
}

#[test]
fn or_wraps_in_clause_array() {
    assert_eq!(
        compiled(r#"a.c >= "abc" or e = 0.89"#, &[]),
        marshal(&doc! { "$or": [
            { "a.c": { "$gte": "abc" } },
            { "e": 0.89 },
        ] })
    );
}

#[test]
fn and_binds_tighter_than_or() {
    assert_eq!(
        compiled(r#"a.c > "abc" and f = "some" or e = 90"#, &[]),
        marshal(&doc! { "$or": [
            { "a.c": { "$gt": "abc" }, "f": "some" },
            { "e": 90_i64 },
        ] })
    );
}

#[test]
fn or_chain_flattens() {
    assert_eq!(
        compiled(r#"a.c <= "abc" and f = "some" or e = 90 or g = 100"#, &[]),
        marshal(&doc! { "$or": [
            { "a.c": { "$lte": "abc" }, "f": "some" },
            { "e": 90_i64 },
            { "g": 100_i64 },
        ] })
    );
}

#[test]
fn parenthesised_or_stays_nested() {
    assert_eq!(
        compiled(r#"a.c > "abc" and (f = "some" or e = 90)"#, &[]),
        marshal(&doc! {
            "a.c": { "$gt": "abc" },
            "$or": [
                { "f": "some" },
                { "e": 90_i64 },
            ],
        })
    );
}

#[test]
fn grouped_ors_on_both_sides() {
    // two sibling $or elements; rawdoc! appends where doc! would overwrite
    let expected = bson::rawdoc! {
        "$or": [ { "a": 1_i64 }, { "b": 2_i64 } ],
        "$or": [ { "c": 3_i64 }, { "d": 4_i64 } ],
    };
    assert_eq!(
        compiled("(a = 1 or b = 2) and (c = 3 or d = 4)", &[]),
        expected.as_bytes()
    );
}

// ── Linked comparisons ──────────────────────────────────────────

#[test]
fn same_key_range_becomes_and_array() {
    assert_eq!(
        compiled("a > 90 and a < 100", &[]),
        marshal(&doc! { "$and": [
            { "a": { "$gt": 90_i64 } },
            { "a": { "$lt": 100_i64 } },
        ] })
    );
}

#[test]
fn linked_group_inside_or() {
    assert_eq!(
        compiled("(a > 90 and a < 100) or a = 25", &[]),
        marshal(&doc! { "$or": [
            { "$and": [
                { "a": { "$gt": 90_i64 } },
                { "a": { "$lt": 100_i64 } },
            ] },
            { "a": 25_i64 },
        ] })
    );
}

#[test]
fn linked_group_keeps_unrelated_siblings_outside() {
    assert_eq!(
        compiled("a > 90 and b = 1 and a < 100", &[]),
        marshal(&doc! {
            "$and": [
                { "a": { "$gt": 90_i64 } },
                { "a": { "$lt": 100_i64 } },
            ],
            "b": 1_i64,
        })
    );
}

// ── Arrays ──────────────────────────────────────────────────────

#[test]
fn in_with_heterogeneous_array() {
    assert_eq!(
        compiled(
            "a $in [90, \"abc\", /abc/, ISODate('2022-01-01T00:00:00Z')]",
            &[]
        ),
        marshal(&doc! { "a": { "$in": [
            Bson::Int64(90),
            Bson::String("abc".into()),
            regex("abc", ""),
            Bson::DateTime(date("2022-01-01T00:00:00Z")),
        ] } })
    );
}

#[test]
fn in_with_numbers() {
    assert_eq!(
        compiled("num $in [1, 3]", &[]),
        marshal(&doc! { "num": { "$in": [1_i64, 3_i64] } })
    );
}

// ── Parameters ──────────────────────────────────────────────────

#[test]
fn bound_parameter_takes_the_value_type() {
    assert_eq!(
        compiled(r#"a >= "$prm""#, &params!["$prm" => 20]),
        marshal(&doc! { "a": { "$gte": 20_i32 } })
    );

    let when = date("2022-01-01T00:00:00Z");
    assert_eq!(
        compiled(r#"a >= "$prm""#, &params!["$prm" => when]),
        marshal(&doc! { "a": { "$gte": when } })
    );
}

#[test]
fn document_parameter_is_encoded_through_the_codec() {
    assert_eq!(
        compiled(
            r#"loc = "$box""#,
            &params!["$box" => doc! { "lat": 1_i32, "lng": 2_i32 }]
        ),
        marshal(&doc! { "loc": { "lat": 1_i32, "lng": 2_i32 } })
    );
}

#[test]
fn unbound_parameter_stays_verbatim() {
    assert_eq!(
        compiled(r#"a = "$missing""#, &[]),
        marshal(&doc! { "a": "$missing" })
    );
}

#[test]
fn parameter_errors() {
    let err = mtql::compile("a = 1", &[Bson::String("$1".into())]).unwrap_err();
    assert!(matches!(err, mtql::Error::Parameter(_)));

    let err = mtql::compile("a = 1", &params![1 => 2]).unwrap_err();
    assert!(matches!(err, mtql::Error::Parameter(_)));
}

// ── Reuse and determinism ───────────────────────────────────────

#[test]
fn repeat_compiles_are_byte_identical() {
    let ready = mtql::prepare(r#"a > 90 and a < 100 or b = "x""#).unwrap();
    let first = ready.compile(&[]).unwrap().marshal_bson().to_vec();
    let second = ready.compile(&[]).unwrap().marshal_bson().to_vec();
    assert_eq!(first, second);
}

#[test]
fn concurrent_compiles_are_independent() {
    let ready = mtql::prepare(r#"a >= "$prm""#).unwrap();

    let number = marshal(&doc! { "a": { "$gte": 20_i32 } });
    let when = date("2022-01-01T00:00:00Z");
    let timed = marshal(&doc! { "a": { "$gte": when } });

    std::thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                for _ in 0..500 {
                    let query = ready.compile(&params!["$prm" => 20]).unwrap();
                    assert_eq!(query.marshal_bson(), number);
                }
            });
            scope.spawn(|| {
                for _ in 0..500 {
                    let query = ready.compile(&params!["$prm" => when]).unwrap();
                    assert_eq!(query.marshal_bson(), timed);
                }
            });
        }
    });
}

#[test]
fn compiled_bytes_decode_as_a_document() {
    let bytes = compiled(r#"a.c > "abc" and (f = "some" or e = 90)"#, &[]);
    let decoded = Document::from_reader(&mut std::io::Cursor::new(&bytes)).unwrap();
    assert_eq!(
        decoded,
        doc! {
            "a.c": { "$gt": "abc" },
            "$or": [ { "f": "some" }, { "e": 90_i64 } ],
        }
    );
}

// ── Errors and must-variants ────────────────────────────────────

#[test]
fn parse_error_carries_position() {
    let err = mtql::compile("a = 1)", &[]).unwrap_err();
    let mtql::Error::Parse { line, column, .. } = err else {
        panic!("expected parse error, got {err}");
    };
    assert_eq!(line, 1);
    assert_eq!(column, 7);
}

#[test]
fn empty_source_is_a_parse_error() {
    assert!(matches!(
        mtql::compile("", &[]),
        Err(mtql::Error::Parse { .. })
    ));
}

#[test]
#[should_panic(expected = "can not compile query")]
fn must_compile_panics_on_bad_source() {
    mtql::must_compile("a = ", &[]);
}

#[test]
fn must_prepare_returns_reusable_query() {
    let ready = mtql::must_prepare("a = 1");
    assert_eq!(
        ready.compile(&[]).unwrap().marshal_bson(),
        marshal(&doc! { "a": 1_i64 })
    );
}
