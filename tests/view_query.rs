//! View Query Tests
//!
//! Exercises every selection mode end to end:
//! 1. Full scans and the total_rows envelope
//! 2. Key lists and single keys
//! 3. Ranges with doc-id refinement and exclusive ends
//! 4. Array and string prefixes
//! 5. Grouped reduce with skip and limit applied afterwards
//! 6. Post-processing hooks

use serde_json::{json, Value};

use vane::memview::{
    reduce, Emitter, GroupLevel, MemView, SourceDocument, ViewDefinition, ViewRow,
};

/// Index of [artist, album, track] keys with play counts as values.
fn library() -> MemView {
    let view = MemView::new(ViewDefinition::new(
        "tracks",
        |doc: &SourceDocument, emitter: &mut Emitter| {
            if let (Some(artist), Some(album), Some(track)) = (
                doc.body.get("artist"),
                doc.body.get("album"),
                doc.body.get("track"),
            ) {
                let plays = doc.body.get("plays").cloned().unwrap_or(json!(0));
                emitter.emit(json!([artist, album, track]), plays);
            }
        },
    ));
    let rows = [
        ("t1", json!(["abba", "arrival", 1]), json!(10)),
        ("t2", json!(["abba", "arrival", 2]), json!(4)),
        ("t3", json!(["abba", "waterloo", 1]), json!(7)),
        ("t4", json!(["beatles", "abbey road", 1]), json!(20)),
        ("t5", json!(["beatles", "help", 1]), json!(3)),
        ("t6", json!(["cash", "hurt", 1]), json!(9)),
    ];
    for (id, key, plays) in rows {
        view.add_document(ViewRow::new(id, key, plays)).unwrap();
    }
    view
}

fn names() -> MemView {
    let view = MemView::new(ViewDefinition::by_id("names"));
    for id in ["apple", "apricot", "banana", "cherry", "app"] {
        view.add_document(ViewRow::new(id, json!(id), json!(null))).unwrap();
    }
    view
}

fn keys_of(result: &vane::memview::QueryResult) -> Vec<Value> {
    result.rows.iter().map(|r| r.key.clone()).collect()
}

// =============================================================================
// SCANS AND ENVELOPE
// =============================================================================

/// Test: An unconstrained query returns every row and counts them.
#[test]
fn test_all_items_with_total() {
    let view = library();
    let result = view.query().run().unwrap();
    assert_eq!(result.total_rows, 6);
    assert_eq!(result.rows.len(), 6);
}

/// Test: total_rows counts matches before skip and limit.
#[test]
fn test_total_rows_ignores_skip_and_limit() {
    let view = library();
    let result = view.query().skip(2).limit(2).run().unwrap();
    assert_eq!(result.total_rows, 6);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].id.as_deref(), Some("t3"));
}

/// Test: Descending reverses the order before skip and limit apply.
#[test]
fn test_descending_with_limit() {
    let view = library();
    let result = view.query().descending(true).limit(2).run().unwrap();
    let ids: Vec<&str> = result.rows.iter().map(|r| r.id.as_deref().unwrap()).collect();
    assert_eq!(ids, vec!["t6", "t5"]);
}

/// Test: Queries against an empty view return an empty envelope.
#[test]
fn test_empty_view_queries_cleanly() {
    let view = MemView::new(ViewDefinition::by_id("empty"));
    let result = view.query().start_key(json!(1)).end_key(json!(9)).run().unwrap();
    assert_eq!(result.total_rows, 0);
    assert!(result.rows.is_empty());
}

// =============================================================================
// KEY SELECTION
// =============================================================================

/// Test: A key list returns the matching rows in list order, skipping
/// absent keys.
#[test]
fn test_key_list_in_request_order() {
    let view = names();
    let result = view
        .query()
        .keys(vec![json!("cherry"), json!("nope"), json!("app")])
        .run()
        .unwrap();
    assert_eq!(keys_of(&result), vec![json!("cherry"), json!("app")]);
}

/// Test: A single-key query returns every row sharing that key.
#[test]
fn test_single_key_returns_all_matching_rows() {
    let view = MemView::new(ViewDefinition::by_id("shared"));
    view.add_document(ViewRow::new("a", json!("k"), json!(1))).unwrap();
    view.add_document(ViewRow::new("b", json!("k"), json!(2))).unwrap();
    view.add_document(ViewRow::new("c", json!("other"), json!(3))).unwrap();

    let result = view.query().key(json!("k")).run().unwrap();
    assert_eq!(result.total_rows, 2);
}

// =============================================================================
// RANGES
// =============================================================================

/// Test: Range bounds are inclusive by default.
#[test]
fn test_range_inclusive_by_default() {
    let view = names();
    let result = view
        .query()
        .start_key(json!("apricot"))
        .end_key(json!("banana"))
        .run()
        .unwrap();
    assert_eq!(keys_of(&result), vec![json!("apricot"), json!("banana")]);
}

/// Test: An exclusive end drops rows whose key equals the end key.
#[test]
fn test_exclusive_end_drops_boundary() {
    let view = names();
    let result = view
        .query()
        .start_key(json!("apricot"))
        .end_key(json!("banana"))
        .exclusive_end()
        .run()
        .unwrap();
    assert_eq!(keys_of(&result), vec![json!("apricot")]);
}

/// Test: Splitting a range at a boundary with an exclusive end on the
/// first half partitions it: no row lost, none counted twice.
#[test]
fn test_split_ranges_partition_without_double_count() {
    let view = names();
    let whole = view
        .query()
        .start_key(json!("app"))
        .end_key(json!("cherry"))
        .run()
        .unwrap();
    let first = view
        .query()
        .start_key(json!("app"))
        .end_key(json!("banana"))
        .exclusive_end()
        .run()
        .unwrap();
    let second = view
        .query()
        .start_key(json!("banana"))
        .end_key(json!("cherry"))
        .run()
        .unwrap();

    let mut stitched = keys_of(&first);
    stitched.extend(keys_of(&second));
    assert_eq!(stitched, keys_of(&whole));
    assert_eq!(first.total_rows + second.total_rows, whole.total_rows);
}

/// Test: Duplicate keys across documents keep both rows in key order,
/// ids breaking the tie; counting them all sees every row.
#[test]
fn test_duplicate_keys_range_and_count() {
    let view = MemView::new(
        ViewDefinition::new(
            "ages",
            |doc: &SourceDocument, emitter: &mut Emitter| {
                if let Some(age) = doc.body.get("age") {
                    emitter.emit_key(age.clone());
                }
            },
        )
        .with_reduce(reduce::count()),
    );
    view.add_document(ViewRow::new("d1", json!(10), json!(null))).unwrap();
    view.add_document(ViewRow::new("d2", json!(20), json!(null))).unwrap();
    view.add_document(ViewRow::new("d3", json!(10), json!(null))).unwrap();

    let tens = view
        .query()
        .reduce(false)
        .start_key(json!(10))
        .end_key(json!(10))
        .run()
        .unwrap();
    let ids: Vec<&str> = tens.rows.iter().map(|r| r.id.as_deref().unwrap()).collect();
    assert_eq!(ids, vec!["d1", "d3"]);

    let counted = view.query().run().unwrap();
    assert_eq!(counted.rows[0].value, json!(3));
}

/// Test: A single-aggregate count over N rows is N.
#[test]
fn test_single_level_count_tallies_all_rows() {
    let view = MemView::new(ViewDefinition::by_id("tally").with_reduce(reduce::count()));
    for i in 0..17 {
        view.add_document(ViewRow::new(format!("d{i}"), json!(i), json!(null)))
            .unwrap();
    }
    let result = view
        .query()
        .group_level(GroupLevel::Single)
        .run()
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].value, json!(17));
}

/// Test: Doc-id bounds refine position within runs of equal keys.
#[test]
fn test_doc_id_bounds_within_equal_keys() {
    let view = MemView::new(ViewDefinition::by_id("runs"));
    for id in ["a", "b", "c", "d"] {
        view.add_document(ViewRow::new(id, json!("k"), json!(null))).unwrap();
    }

    let result = view
        .query()
        .start_key(json!("k"))
        .start_doc_id("b")
        .end_key(json!("k"))
        .end_doc_id("c")
        .run()
        .unwrap();
    let ids: Vec<&str> = result.rows.iter().map(|r| r.id.as_deref().unwrap()).collect();
    assert_eq!(ids, vec!["b", "c"]);
}

/// Test: An inverted range is empty, not an error.
#[test]
fn test_inverted_range_is_empty() {
    let view = names();
    let result = view
        .query()
        .start_key(json!("cherry"))
        .end_key(json!("apple"))
        .run()
        .unwrap();
    assert_eq!(result.total_rows, 0);
}

// =============================================================================
// PREFIXES
// =============================================================================

/// Test: An array prefix selects exactly the keys extending it.
#[test]
fn test_array_prefix_selects_extensions() {
    let view = library();
    let result = view.query().array_prefix(vec![json!("abba")]).run().unwrap();
    assert_eq!(result.total_rows, 3);
    assert!(result
        .rows
        .iter()
        .all(|r| r.key.as_array().unwrap()[0] == json!("abba")));

    let two = view
        .query()
        .array_prefix(vec![json!("abba"), json!("arrival")])
        .run()
        .unwrap();
    assert_eq!(two.total_rows, 2);
}

/// Test: The bare prefix key itself is not an extension.
#[test]
fn test_array_prefix_excludes_bare_prefix_row() {
    let view = MemView::new(ViewDefinition::by_id("mixed"));
    view.add_document(ViewRow::new("bare", json!(["a"]), json!(null))).unwrap();
    view.add_document(ViewRow::new("ext", json!(["a", 1]), json!(null))).unwrap();

    let result = view.query().array_prefix(vec![json!("a")]).run().unwrap();
    assert_eq!(keys_of(&result), vec![json!(["a", 1])]);
}

/// Test: A string prefix matches strings sharing the leading text,
/// including the prefix itself.
#[test]
fn test_string_prefix_on_plain_strings() {
    let view = names();
    let result = view.query().string_prefix(json!("ap")).run().unwrap();
    assert_eq!(
        keys_of(&result),
        vec![json!("app"), json!("apple"), json!("apricot")]
    );
}

/// Test: A string prefix whose last element is a string works inside
/// array keys too.
#[test]
fn test_string_prefix_inside_array_keys() {
    let view = library();
    let result = view
        .query()
        .string_prefix(json!(["abba", "a"]))
        .run()
        .unwrap();
    assert_eq!(result.total_rows, 2);
    assert!(result
        .rows
        .iter()
        .all(|r| r.key.as_array().unwrap()[1] == json!("arrival")));
}

/// Test: A string prefix against a non-string key position matches
/// nothing.
#[test]
fn test_string_prefix_requires_string_position() {
    let view = library();
    let result = view.query().string_prefix(json!(42)).run().unwrap();
    assert_eq!(result.total_rows, 0);
}

// =============================================================================
// REDUCE AND GROUPING
// =============================================================================

fn reducing_library() -> MemView {
    let view = MemView::new(
        ViewDefinition::new(
            "plays",
            |doc: &SourceDocument, emitter: &mut Emitter| {
                if let Some(key) = doc.body.get("key") {
                    emitter.emit(key.clone(), doc.body.get("plays").cloned().unwrap_or(json!(0)));
                }
            },
        )
        .with_reduce(reduce::sum()),
    );
    let rows = [
        ("t1", json!(["abba", "arrival", 1]), json!(10)),
        ("t2", json!(["abba", "arrival", 2]), json!(4)),
        ("t3", json!(["abba", "waterloo", 1]), json!(7)),
        ("t4", json!(["beatles", "abbey road", 1]), json!(20)),
        ("t5", json!(["beatles", "help", 1]), json!(3)),
    ];
    for (id, key, plays) in rows {
        view.add_document(ViewRow::new(id, key, plays)).unwrap();
    }
    view
}

/// Test: A view with a reduce function reduces by default; one row,
/// null key, aggregate value.
#[test]
fn test_reduce_on_by_default() {
    let view = reducing_library();
    let result = view.query().run().unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].key, json!(null));
    assert_eq!(result.rows[0].value, json!(44));
}

/// Test: reduce(false) returns the raw mapped rows instead.
#[test]
fn test_reduce_can_be_disabled() {
    let view = reducing_library();
    let result = view.query().reduce(false).run().unwrap();
    assert_eq!(result.rows.len(), 5);
}

/// Test: Group level 1 aggregates per leading array element.
#[test]
fn test_group_level_prefix() {
    let view = reducing_library();
    let result = view
        .query()
        .group_level(GroupLevel::Prefix(1))
        .run()
        .unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].key, json!(["abba"]));
    assert_eq!(result.rows[0].value, json!(21));
    assert_eq!(result.rows[1].key, json!(["beatles"]));
    assert_eq!(result.rows[1].value, json!(23));
}

/// Test: Exact grouping keeps every distinct key separate.
#[test]
fn test_group_level_exact() {
    let view = reducing_library();
    let result = view.query().group_level(GroupLevel::Exact).run().unwrap();
    assert_eq!(result.rows.len(), 5);
    assert_eq!(result.rows[0].value, json!(10));
}

/// Test: Skip and limit count groups, not underlying rows.
#[test]
fn test_skip_and_limit_apply_to_groups() {
    let view = reducing_library();
    let result = view
        .query()
        .group_level(GroupLevel::Prefix(2))
        .skip(1)
        .limit(2)
        .run()
        .unwrap();
    assert_eq!(result.total_rows, 4);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].key, json!(["abba", "waterloo"]));
}

/// Test: Grouped reduce respects a key-range selection first.
#[test]
fn test_grouped_reduce_over_range() {
    let view = reducing_library();
    let result = view
        .query()
        .array_prefix(vec![json!("abba")])
        .group_level(GroupLevel::Prefix(2))
        .run()
        .unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].value, json!(14));
    assert_eq!(result.rows[1].value, json!(7));
}

/// Test: Forcing reduce on a view without a reduce function is an
/// error.
#[test]
fn test_reduce_without_function_fails() {
    let view = names();
    let err = view.query().reduce(true).run().unwrap_err();
    assert!(matches!(err, vane::memview::ViewError::MissingReduce(_)));
}

/// Test: The built-in count reduce tallies rows per group.
#[test]
fn test_builtin_count_reduce() {
    let view = MemView::new(
        ViewDefinition::new(
            "counted",
            |doc: &SourceDocument, emitter: &mut Emitter| {
                if let Some(key) = doc.body.get("key") {
                    emitter.emit_key(key.clone());
                }
            },
        )
        .with_reduce(reduce::count()),
    );
    view.add_document(ViewRow::new("a", json!("x"), json!(null))).unwrap();
    view.add_document(ViewRow::new("b", json!("x"), json!(null))).unwrap();
    view.add_document(ViewRow::new("c", json!("y"), json!(null))).unwrap();

    let result = view.query().group_level(GroupLevel::Exact).run().unwrap();
    assert_eq!(result.rows[0].value, json!(2));
    assert_eq!(result.rows[1].value, json!(1));
}

// =============================================================================
// POST-PROCESSING
// =============================================================================

/// Test: A post-process hook sees the final row set and may reshape
/// it.
#[test]
fn test_post_process_reshapes_rows() {
    let view = MemView::new(
        ViewDefinition::by_id("filtered").with_post_process(|rows| {
            rows.into_iter()
                .filter(|row| row.key.as_str().map(|k| k != "skip").unwrap_or(true))
                .collect()
        }),
    );
    view.add_document(ViewRow::new("a", json!("keep"), json!(null))).unwrap();
    view.add_document(ViewRow::new("b", json!("skip"), json!(null))).unwrap();

    let result = view.query().run().unwrap();
    assert_eq!(keys_of(&result), vec![json!("keep")]);
    // The envelope still reports the pre-hook match count.
    assert_eq!(result.total_rows, 2);
}
