#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use meridian::{
    mutation::{parse_rdf, Materializer, NQuads, Op},
    query::VarBindings,
    schema::SchemaSnapshot,
    storage::MemStore,
    types::Uid,
};

const THREADS: usize = 8;
const LABELS_PER_THREAD: usize = 64;

fn batch(thread: usize) -> NQuads {
    let text: String = (0..LABELS_PER_THREAD)
        .map(|i| format!("_:t{thread}n{i} <name> \"node {i}\" .\n_:t{thread}n{i} <next> _:t{thread}n{} .\n", (i + 1) % LABELS_PER_THREAD))
        .collect();
    NQuads::wrap(parse_rdf(&text).expect("batch parses"), Op::Set)
}

#[test]
fn concurrent_calls_never_share_uids() {
    let store = Arc::new(MemStore::new());
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let quads = batch(t);
                let schema = SchemaSnapshot::new();
                let vars = VarBindings::default();
                barrier.wait();
                Materializer::new(&*store, &schema, &vars)
                    .materialize(&quads)
                    .expect("materializes")
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    for worker in workers {
        let out = worker.join().unwrap();
        assert_eq!(out.new_uids.len(), LABELS_PER_THREAD);
        assert_eq!(out.edges.len(), 2 * LABELS_PER_THREAD);
        for uid in out.new_uids.values() {
            assert!(!uid.is_fingerprint());
            assert!(all.insert(*uid), "uid {uid:?} handed out twice");
        }
    }
    assert_eq!(all.len(), THREADS * LABELS_PER_THREAD);
    assert!(!all.contains(&Uid(0)));
}

#[test]
fn retried_batch_never_reuses_prior_uids() {
    let store = MemStore::new();
    let schema = SchemaSnapshot::new();
    let vars = VarBindings::default();
    let quads = batch(0);
    let first = Materializer::new(&store, &schema, &vars).materialize(&quads).unwrap();
    let second = Materializer::new(&store, &schema, &vars).materialize(&quads).unwrap();

    let earlier: BTreeSet<Uid> = first.new_uids.values().copied().collect();
    for (label, uid) in &second.new_uids {
        assert!(!earlier.contains(uid), "label {label} reused {uid:?}");
    }
    assert_eq!(
        first.new_uids.keys().collect::<Vec<_>>(),
        second.new_uids.keys().collect::<Vec<_>>()
    );
}
