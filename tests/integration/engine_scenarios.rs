#![allow(missing_docs)]

use std::sync::Arc;

use meridian::{
    engine::{Engine, EngineOptions, ExecutionResult, RequestContext},
    error::{ErrorClass, RequestError},
    query::{BlockParser, Latency, Request, RequestParser, ScanEvaluator},
    storage::{MemStore, Storage},
    types::{TypeId, Uid, Value},
};
use serde_json::json;

fn node() -> (Engine, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(
        store.clone(),
        Arc::new(BlockParser),
        Arc::new(ScanEvaluator::new(store.clone())),
        EngineOptions::default(),
    );
    (engine, store)
}

fn exec(engine: &Engine, text: &str) -> Result<ExecutionResult, RequestError> {
    let parsed = BlockParser
        .parse(&Request::text(text))
        .expect("request text parses");
    engine.execute(&RequestContext::default(), parsed, &mut Latency::new())
}

fn people(engine: &Engine) -> ExecutionResult {
    exec(
        engine,
        r#"mutation { set {
            _:alice <name> "Alice" .
            _:alice <age> "31"^^<xs:int> .
            _:bob <name> "Bob" .
            _:bob <age> "27"^^<xs:int> .
            _:alice <friend> _:bob .
        } }"#,
    )
    .expect("seed data applies")
}

#[test]
fn declared_int_index_applies_typed_fact() {
    let (engine, store) = node();
    let out = exec(
        &engine,
        r#"mutation {
            schema { age: int @index(int) . }
            set { <peter> <age> "28"^^<xs:int> . }
        }"#,
    )
    .unwrap();
    assert!(out.allocations.is_empty());

    let peter = Uid::fingerprint("peter");
    assert_eq!(store.scalar("age", peter), Some(Value::Int(28)));
    let schema = store.fetch_schema(&["age".to_string()]).unwrap();
    assert_eq!(schema.len(), 1);
    assert_eq!(schema[0].value_type, TypeId::Int);
    assert_eq!(schema[0].tokenizer, vec!["int".to_string()]);
    assert_eq!(store.lookup_eq("age", "28"), vec![peter]);
    assert_eq!(store.stats().edges, 1);
}

#[test]
fn untyped_literal_follows_first_typed_fact() {
    let (engine, store) = node();
    exec(
        &engine,
        r#"mutation { set {
            <a> <age> "15"^^<xs:int> .
            <b> <age> "13" .
        } }"#,
    )
    .unwrap();
    assert_eq!(store.predicate_type("age"), Some(TypeId::Int));
    assert_eq!(store.scalar("age", Uid::fingerprint("b")), Some(Value::Int(13)));

    let err = exec(&engine, r#"mutation { set { <c> <age> "old"^^<xs:string> . } }"#).unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest);
    assert_eq!(store.scalar("age", Uid::fingerprint("c")), None);
}

#[test]
fn conflicting_types_in_one_batch_apply_nothing() {
    let (engine, store) = node();
    let err = exec(
        &engine,
        r#"mutation { set {
            <a> <score> "1"^^<xs:int> .
            <b> <score> "1.5"^^<xs:float> .
        } }"#,
    )
    .unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest);
    assert_eq!(store.predicate_type("score"), None);
    assert_eq!(store.stats().edges, 0);
}

#[test]
fn dependent_facts_with_no_bound_rows_apply_nothing() {
    let (engine, store) = node();
    people(&engine);
    let edges = store.stats().edges;
    let out = exec(
        &engine,
        r#"
        mutation { set { <carol> <knows> uid(nobody) . } }
        { nobody as var(func: eq(name, "Nobody")) { name } }
        "#,
    )
    .unwrap();
    assert!(out.subgraphs.is_empty());
    assert_eq!(store.stats().edges, edges);
    assert!(store.links("knows", Uid::fingerprint("carol")).is_empty());
}

#[test]
fn dependent_facts_use_query_bindings() {
    let (engine, store) = node();
    let seeded = people(&engine);
    let alice = seeded.allocations["alice"];
    let bob = seeded.allocations["bob"];

    exec(
        &engine,
        r#"
        mutation { set {
            uid(adults) <verified> "true"^^<xs:boolean> .
            uid(adults) <age_copy> val(years) .
        } }
        { adults as var(func: has(age)) { years as age } }
        "#,
    )
    .unwrap();
    assert_eq!(store.scalar("verified", alice), Some(Value::Bool(true)));
    assert_eq!(store.scalar("verified", bob), Some(Value::Bool(true)));
    assert_eq!(store.scalar("age_copy", alice), Some(Value::Int(31)));
    assert_eq!(store.scalar("age_copy", bob), Some(Value::Int(27)));
}

#[test]
fn blank_node_in_dependent_fact_fails_without_allocating() {
    let (engine, store) = node();
    people(&engine);
    let before = store.stats();
    let err = exec(
        &engine,
        r#"
        mutation { set { _:new <friend> uid(named) . } }
        { named as var(func: has(name)) { name } }
        "#,
    )
    .unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest);
    let after = store.stats();
    assert_eq!(after.next_uid, before.next_uid);
    assert_eq!(after.edges, before.edges);
}

#[test]
fn rejected_dependent_fact_leaves_independent_facts_unapplied() {
    let (engine, store) = node();
    let err = exec(
        &engine,
        r#"
        mutation { set {
            _:a <name> "kept" .
            uid(v) <friend> _:b .
        } }
        { v as var(func: has(name)) { uid } }
        "#,
    )
    .unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest);
    let stats = store.stats();
    assert_eq!(stats.edges, 0);
    assert_eq!(stats.next_uid, 1);
}

#[test]
fn undefined_mutation_variable_leaves_independent_facts_unapplied() {
    let (engine, store) = node();
    let err = exec(
        &engine,
        r#"
        mutation { set {
            _:a <name> "kept" .
            uid(missing) <friend> <bob> .
        } }
        { v as var(func: has(name)) { uid } }
        "#,
    )
    .unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest);
    assert!(err.to_string().contains("missing"), "{err}");
    let stats = store.stats();
    assert_eq!(stats.edges, 0);
    assert_eq!(stats.next_uid, 1);
}

#[test]
fn allocation_skips_uids_written_by_clients() {
    let (engine, store) = node();
    exec(&engine, r#"mutation { set { <0x3> <name> "existing" . } }"#).unwrap();
    let out = exec(
        &engine,
        r#"mutation { set {
            _:a <name> "a" .
            _:b <name> "b" .
            _:c <name> "c" .
        } }"#,
    )
    .unwrap();
    assert!(out.allocations.values().all(|uid| *uid != Uid(3)));
    assert_eq!(
        store.scalar("name", Uid(3)),
        Some(Value::Default("existing".into()))
    );
}

#[test]
fn second_sortable_tokenizer_for_a_predicate_is_rejected() {
    let (engine, store) = node();
    let err = exec(
        &engine,
        "mutation { schema { p: datetime @index(year) .\n p: datetime @index(month) . } }",
    )
    .unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest);
    assert!(
        err.message().contains("more than one sortable index"),
        "{}",
        err.message()
    );
    assert!(store.fetch_schema(&["p".to_string()]).unwrap().is_empty());
}

#[test]
fn retried_request_allocates_fresh_uids() {
    let (engine, _) = node();
    let text = r#"mutation { set { _:x <name> "again" . } }"#;
    let first = exec(&engine, text).unwrap();
    let second = exec(&engine, text).unwrap();
    assert_ne!(first.allocations["x"], second.allocations["x"]);
}

#[test]
fn query_sees_independent_facts_of_the_same_request() {
    let (engine, _) = node();
    let out = exec(
        &engine,
        r#"
        mutation { set { _:z <name> "Zed" . } }
        { zed(func: eq(name, "Zed")) { uid name } }
        "#,
    )
    .unwrap();
    let zed = out.allocations["z"];
    assert_eq!(out.subgraphs.len(), 1);
    assert_eq!(
        out.subgraphs[0].rows,
        vec![json!({ "uid": zed.to_hex(), "name": "Zed" })]
    );
}

#[test]
fn delete_removes_matching_value_only() {
    let (engine, store) = node();
    let seeded = people(&engine);
    let alice = seeded.allocations["alice"];
    let bob = seeded.allocations["bob"];
    let text = format!(
        "mutation {{ delete {{ <{}> <age> \"99\" .\n <{}> <friend> <{}> . }} }}",
        alice.to_hex(),
        alice.to_hex(),
        bob.to_hex()
    );
    exec(&engine, &text).unwrap();
    assert_eq!(store.scalar("age", alice), Some(Value::Int(31)));
    assert!(store.links("friend", alice).is_empty());
    assert!(store.reverse_links("friend", bob).is_empty());
}

#[test]
fn schema_query_runs_after_schema_changes() {
    let (engine, _) = node();
    let out = exec(
        &engine,
        "mutation { schema { name: string @index(exact) . } }\nschema(pred: [name]) {}",
    )
    .unwrap();
    assert_eq!(out.schema.len(), 1);
    assert_eq!(out.schema[0].tokenizer, vec!["exact".to_string()]);
}
