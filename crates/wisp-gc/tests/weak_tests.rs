//! Weak reference tests
//!
//! These tests drive full collection cycles through the public runtime API
//! and check what weak pairs and weak containers keep alive.

use wisp_gc::{ErrorKind, GcError, PairSlot, Runtime, Value, WeakKind};

/// Bucket holding a single `(key . value)` entry
fn single_entry(rt: &mut Runtime, key: Value, value: Value) -> Value {
    let entry = rt.cons(key, value);
    rt.list([entry])
}

fn bucket_keys(rt: &mut Runtime, bucket: Value) -> Vec<Value> {
    let entries = rt.heap().list_to_vec(bucket).unwrap_or_default();
    entries
        .into_iter()
        .map(|entry| rt.car(entry).unwrap())
        .collect()
}

#[test]
fn test_weak_pair_tombstone_is_permanent() {
    let mut rt = Runtime::new();
    let key = rt.string("key");
    let key_root = rt.root(key);
    let pair = rt.weak_car_pair(key, Value::Int(7));
    rt.root(pair);

    rt.gc();
    assert_eq!(rt.weak_pair_ref(pair, PairSlot::Car), Ok(key));
    assert_eq!(rt.weak_pair_is_deleted(pair, PairSlot::Car), Ok(false));

    rt.unroot(key_root);
    rt.gc();
    assert_eq!(rt.weak_pair_ref(pair, PairSlot::Car), Ok(Value::FALSE));
    assert_eq!(rt.weak_pair_is_deleted(pair, PairSlot::Car), Ok(true));
    assert_eq!(rt.weak_pair_ref(pair, PairSlot::Cdr), Ok(Value::Int(7)));

    // later cycles never bring the slot back
    for _ in 0..3 {
        rt.gc();
        assert_eq!(rt.weak_pair_is_deleted(pair, PairSlot::Car), Ok(true));
        assert_eq!(rt.weak_pair_ref(pair, PairSlot::Car), Ok(Value::FALSE));
    }
}

#[test]
fn test_weak_cdr_pair_keeps_car() {
    let mut rt = Runtime::new();
    let car = rt.string("car");
    let cdr = rt.string("cdr");
    let pair = rt.weak_cdr_pair(car, cdr);
    rt.root(pair);

    rt.gc();

    assert_eq!(rt.weak_pair_ref(pair, PairSlot::Car), Ok(car));
    assert_eq!(rt.weak_pair_is_deleted(pair, PairSlot::Cdr), Ok(true));
    assert!(rt.heap().contains(car.as_object().unwrap()));
    assert!(!rt.heap().contains(cdr.as_object().unwrap()));
}

#[test]
fn test_doubly_weak_pair_deletes_both_slots_in_one_sweep() {
    let mut rt = Runtime::new();
    let a = rt.string("a");
    let b = rt.string("b");
    let pair = rt.doubly_weak_pair(a, b);
    rt.root(pair);

    let report = rt.gc();

    assert_eq!(report.weak.pair_slots_deleted, 2);
    assert_eq!(rt.weak_pair_is_deleted(pair, PairSlot::Car), Ok(true));
    assert_eq!(rt.weak_pair_is_deleted(pair, PairSlot::Cdr), Ok(true));
    assert_eq!(rt.weak_pair_is_deleted_either(pair), Ok(true));
}

#[test]
fn test_weak_key_container_of_four() {
    let mut rt = Runtime::new();
    let table = rt.make_weak_key_alist_vector(4).unwrap();
    rt.root(table);

    let mut keys = Vec::new();
    for i in 0..4 {
        let key = rt.string(format!("k{i}"));
        let value = rt.string(format!("v{i}"));
        let bucket = single_entry(&mut rt, key, value);
        rt.vector_set(table, i, bucket).unwrap();
        keys.push(key);
    }
    rt.root(keys[0]);

    let report = rt.gc();

    assert_eq!(report.weak.dropped, 3);
    let bucket0 = rt.vector_ref(table, 0).unwrap();
    assert_eq!(bucket_keys(&mut rt, bucket0), vec![keys[0]]);
    for i in 1..4 {
        assert_eq!(rt.vector_ref(table, i), Ok(Value::Nil));
        assert!(!rt.heap().contains(keys[i as usize].as_object().unwrap()));
    }

    assert_eq!(rt.take_drop_delta(table), Ok(3));
    assert_eq!(rt.take_drop_delta(table), Ok(0));
}

#[test]
fn test_weak_key_value_survives_with_key() {
    let mut rt = Runtime::new();
    let table = rt.make_weak_key_alist_vector(1).unwrap();
    rt.root(table);
    let key = rt.string("key");
    let key_root = rt.root(key);
    // the value is only reachable through the table
    let value = rt.list([Value::Int(1), Value::Int(2)]);
    let bucket = single_entry(&mut rt, key, value);
    rt.vector_set(table, 0, bucket).unwrap();

    rt.gc();
    assert_eq!(rt.drop_delta(table), Ok(0));
    assert_eq!(
        rt.heap().list_to_vec(value),
        Some(vec![Value::Int(1), Value::Int(2)])
    );

    rt.unroot(key_root);
    rt.gc();
    assert_eq!(rt.drop_delta(table), Ok(1));
    assert_eq!(rt.vector_ref(table, 0), Ok(Value::Nil));
    assert!(!rt.heap().contains(value.as_object().unwrap()));
}

#[test]
fn test_weak_value_entry_dies_with_value() {
    let mut rt = Runtime::new();
    let table = rt.make_weak_value_alist_vector(1).unwrap();
    rt.root(table);

    let live_key = rt.string("live");
    let live_value = rt.string("kept");
    let dead_key = rt.string("dead");
    let dead_value = rt.string("lost");
    rt.root(live_value);

    let live_entry = rt.cons(live_key, live_value);
    let dead_entry = rt.cons(dead_key, dead_value);
    let bucket = rt.list([dead_entry, live_entry]);
    rt.vector_set(table, 0, bucket).unwrap();

    let report = rt.gc();

    assert_eq!(report.weak.dropped, 1);
    let bucket = rt.vector_ref(table, 0).unwrap();
    assert_eq!(bucket_keys(&mut rt, bucket), vec![live_key]);
    // the key of a live entry is kept by its value
    assert!(rt.heap().contains(live_key.as_object().unwrap()));
    assert!(!rt.heap().contains(dead_key.as_object().unwrap()));
}

#[test]
fn test_weak_key_chain_needs_several_passes() {
    let mut rt = Runtime::new();
    let a = rt.make_weak_key_alist_vector(1).unwrap();
    let b = rt.make_weak_key_alist_vector(1).unwrap();
    rt.root(a);
    rt.root(b);

    let k1 = rt.string("k1");
    let k2 = rt.string("k2");
    let k3 = rt.string("k3");
    let k4 = rt.string("k4");
    rt.root(k1);

    // k1 -> k2 (in a), k2 -> k3 (in b), k3 -> k4 (in a)
    let v1 = rt.list([k2]);
    let v2 = rt.list([k3]);
    let v3 = rt.list([k4]);
    let e1 = rt.cons(k1, v1);
    let e3 = rt.cons(k3, v3);
    let a_bucket = rt.list([e3, e1]);
    let b_bucket = single_entry(&mut rt, k2, v2);
    rt.vector_set(a, 0, a_bucket).unwrap();
    rt.vector_set(b, 0, b_bucket).unwrap();

    let report = rt.gc();

    assert!(
        report.fixpoint_iterations >= 4,
        "expected a multi-pass fixed point, got {}",
        report.fixpoint_iterations
    );
    assert_eq!(report.weak.dropped, 0);
    assert_eq!(rt.stats().last_fixpoint_iterations, report.fixpoint_iterations);
    for key in [k2, k3, k4] {
        assert!(rt.heap().contains(key.as_object().unwrap()));
    }
    let a_bucket = rt.vector_ref(a, 0).unwrap();
    assert_eq!(bucket_keys(&mut rt, a_bucket), vec![k3, k1]);
}

#[test]
fn test_plain_weak_vector_slots() {
    let mut rt = Runtime::new();
    let kept = rt.string("kept");
    let lost = rt.string("lost");
    let list = rt.list([kept, lost, Value::Int(3)]);
    let v = rt.weak_vector(list).unwrap();
    rt.root(v);
    rt.root(kept);

    assert_eq!(rt.type_of(v), WeakKind::WeakValue);
    let report = rt.gc();

    assert_eq!(report.weak.dropped, 1);
    assert_eq!(rt.vector_ref(v, 0), Ok(kept));
    assert_eq!(rt.vector_ref(v, 1), Ok(Value::FALSE));
    // immediates are never dropped
    assert_eq!(rt.vector_ref(v, 2), Ok(Value::Int(3)));
    assert_eq!(rt.take_drop_delta(v), Ok(1));
}

#[test]
fn test_not_weak_container_is_never_swept() {
    let mut rt = Runtime::new();
    let fill = rt.string("fill");
    let v = rt.make_weak_vector(3, fill, false, false).unwrap();
    rt.root(v);
    let table = rt.make_weak_alist_vector(1, false, false).unwrap();
    rt.root(table);
    let key = rt.string("key");
    let bucket = single_entry(&mut rt, key, Value::Int(1));
    rt.vector_set(table, 0, bucket).unwrap();

    assert_eq!(rt.type_of(v), WeakKind::NotWeak);
    for _ in 0..2 {
        let report = rt.gc();
        assert_eq!(report.weak.dropped, 0);
    }

    for i in 0..3 {
        assert_eq!(rt.vector_ref(v, i), Ok(fill));
    }
    assert_eq!(rt.vector_ref(table, 0), Ok(bucket));
    assert!(rt.heap().contains(key.as_object().unwrap()));
    assert_eq!(rt.drop_delta(v), Ok(0));
}

#[test]
fn test_registry_prunes_unreachable_containers() {
    let mut rt = Runtime::new();
    let kept = rt.make_weak_vector(2, Value::Nil, false, true).unwrap();
    rt.root(kept);
    let dropped = rt.make_doubly_weak_alist_vector(8).unwrap();
    rt.weak_car_pair(Value::Int(1), Value::Int(2));
    assert_eq!(rt.registry().container_count(), 2);
    assert_eq!(rt.registry().pair_count(), 1);

    let report = rt.gc();

    assert_eq!(report.weak.containers_pruned, 1);
    assert_eq!(report.weak.pairs_pruned, 1);
    assert_eq!(rt.registry().containers(), &[kept.as_object().unwrap()]);
    assert!(!rt.heap().contains(dropped.as_object().unwrap()));
    assert_eq!(rt.stats().last_pruned, 2);
}

#[test]
fn test_container_reachable_from_container() {
    let mut rt = Runtime::new();
    let outer = rt.make_weak_vector(1, Value::Nil, false, false).unwrap();
    rt.root(outer);
    let inner = rt.make_weak_vector(1, Value::Nil, false, true).unwrap();
    let payload = rt.string("payload");
    rt.vector_set(outer, 0, inner).unwrap();
    rt.vector_set(inner, 0, payload).unwrap();

    let report = rt.gc();

    // the strong outer container keeps the inner one, not its weak slot
    assert_eq!(report.weak.containers_pruned, 0);
    assert_eq!(rt.vector_ref(inner, 0), Ok(Value::FALSE));
    assert_eq!(rt.take_drop_delta(inner), Ok(1));
}

#[test]
fn test_weak_refs_to_live_bucket_cells_survive() {
    let mut rt = Runtime::new();
    let table = rt.make_weak_key_alist_vector(1).unwrap();
    rt.root(table);
    let key = rt.string("k");
    rt.root(key);
    let entry = rt.cons(key, Value::Int(1));
    let bucket = rt.list([entry]);
    rt.vector_set(table, 0, bucket).unwrap();

    let to_bucket = rt.weak_car_pair(bucket, Value::Nil);
    rt.root(to_bucket);
    let entries = rt.list([entry]);
    let to_entry = rt.weak_vector(entries).unwrap();
    rt.root(to_entry);

    let report = rt.gc();

    assert_eq!(report.weak.dropped, 0);
    assert_eq!(report.weak.pair_slots_deleted, 0);
    assert_eq!(rt.weak_pair_is_deleted(to_bucket, PairSlot::Car), Ok(false));
    assert_eq!(rt.weak_pair_ref(to_bucket, PairSlot::Car), Ok(bucket));
    assert_eq!(rt.vector_ref(to_entry, 0), Ok(entry));
    assert_eq!(rt.vector_ref(table, 0), Ok(bucket));
    assert_eq!(rt.car(entry), Ok(key));
}

#[test]
fn test_weak_refs_to_unlinked_cells_are_deleted() {
    let mut rt = Runtime::new();
    let table = rt.make_weak_key_alist_vector(1).unwrap();
    rt.root(table);
    let key = rt.string("k");
    let entry = rt.cons(key, Value::Int(1));
    let bucket = rt.list([entry]);
    rt.vector_set(table, 0, bucket).unwrap();

    let to_bucket = rt.weak_car_pair(bucket, Value::Nil);
    rt.root(to_bucket);
    let entries = rt.list([entry]);
    let to_entry = rt.weak_vector(entries).unwrap();
    rt.root(to_entry);

    let report = rt.gc();

    assert_eq!(report.weak.dropped, 2);
    assert_eq!(report.weak.pair_slots_deleted, 1);
    assert_eq!(rt.vector_ref(table, 0), Ok(Value::Nil));
    assert_eq!(rt.weak_pair_is_deleted(to_bucket, PairSlot::Car), Ok(true));
    assert_eq!(rt.vector_ref(to_entry, 0), Ok(Value::FALSE));
    assert!(!rt.heap().contains(entry.as_object().unwrap()));
    assert!(!rt.heap().contains(bucket.as_object().unwrap()));

    // nothing left pointing at the freed cells
    let report = rt.gc();
    assert_eq!(report.weak.dropped, 0);
}

#[test]
fn test_constructor_errors() {
    let mut rt = Runtime::new();

    let err = rt.make_weak_vector(-1, Value::Nil, true, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = rt.make_weak_alist_vector(1 << 40, true, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = rt.make_weak_vector(u32::MAX as i64, Value::Nil, false, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(rt.make_weak_key_alist_vector(wisp_gc::weak_vector::MAX_LENGTH as i64 + 1).is_err());

    let improper = rt.cons(Value::Int(1), Value::Int(2));
    let err = rt.weak_vector(improper).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(err.args(), vec![improper]);

    let v = rt.make_weak_key_alist_vector(2).unwrap();
    assert_eq!(
        rt.vector_ref(v, 2),
        Err(GcError::out_of_range("vector-ref", Value::Int(2)))
    );
    assert_eq!(
        rt.vector_set(v, -1, Value::Nil).unwrap_err().kind(),
        ErrorKind::OutOfRange
    );
    assert_eq!(
        rt.take_drop_delta(improper).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

/// Minimal weak-key hash table on top of an alist-vector, keeping a cached
/// item count the way a table implementation would.
struct WeakKeyTable {
    buckets: Value,
    count: usize,
}

impl WeakKeyTable {
    fn new(rt: &mut Runtime, size: i64) -> Self {
        let buckets = rt.make_weak_key_alist_vector(size).unwrap();
        rt.root(buckets);
        Self { buckets, count: 0 }
    }

    fn bucket_index(&self, rt: &mut Runtime, key: Value) -> i64 {
        let len = rt.vector_length(self.buckets).unwrap() as u32;
        (key.as_object().unwrap().index() % len) as i64
    }

    fn insert(&mut self, rt: &mut Runtime, key: Value, value: Value) {
        let index = self.bucket_index(rt, key);
        let bucket = rt.vector_ref(self.buckets, index).unwrap();
        let entry = rt.cons(key, value);
        let bucket = rt.cons(entry, bucket);
        rt.vector_set(self.buckets, index, bucket).unwrap();
        self.count += 1;
    }

    fn len(&mut self, rt: &mut Runtime) -> usize {
        self.count -= rt.take_drop_delta(self.buckets).unwrap();
        self.count
    }

    fn entries(&self, rt: &mut Runtime) -> usize {
        let len = rt.vector_length(self.buckets).unwrap() as i64;
        (0..len)
            .map(|i| {
                let bucket = rt.vector_ref(self.buckets, i).unwrap();
                rt.heap().list_to_vec(bucket).map_or(0, |entries| entries.len())
            })
            .sum()
    }
}

#[test]
fn test_weak_table_count_reconciles() {
    let mut rt = Runtime::new();
    let mut table = WeakKeyTable::new(&mut rt, 3);

    let mut keys = Vec::new();
    for i in 0..5 {
        let key = rt.string(format!("key{i}"));
        table.insert(&mut rt, key, Value::Int(i));
        keys.push(key);
    }
    rt.root(keys[1]);
    rt.root(keys[4]);
    assert_eq!(table.len(&mut rt), 5);

    rt.gc();
    assert_eq!(table.len(&mut rt), 2);
    assert_eq!(table.entries(&mut rt), 2);

    // the delta was consumed: another quiet cycle changes nothing
    rt.gc();
    assert_eq!(table.len(&mut rt), 2);
}
