use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use rand::Rng;

use crate::Map;

fn init_logger() {
    let _ = env_logger::try_init();
}

#[test]
fn insert_and_load() {
    let m = Map::new();
    assert_eq!(m.len(), 0);
    m.store(1, 2);
    assert_eq!(m.len(), 1);
    m.store(2, 4);
    assert_eq!(m.len(), 2);
    assert_eq!(m.load(&1), Some(2));
    assert_eq!(m.load(&2), Some(4));
    assert_eq!(m.load(&3), None);
}

#[test]
fn store_overwrites() {
    let m = Map::new();
    m.store("k", "v1");
    assert_eq!(m.load(&"k"), Some("v1"));
    m.store("k", "v2");
    assert_eq!(m.load(&"k"), Some("v2"));
    assert_eq!(m.len(), 1);
}

#[test]
fn delete_then_load_is_absent() {
    let m = Map::new();
    m.store(1, "hello");
    m.delete(&1);
    assert_eq!(m.load(&1), None);
    assert_eq!(m.len(), 0);
}

#[test]
fn load_and_delete_reports_presence() {
    let m = Map::new();
    assert_eq!(m.load_and_delete(&1), (None, false));
    m.store(1, "x");
    assert_eq!(m.load_and_delete(&1), (Some("x"), true));
    assert_eq!(m.load_and_delete(&1), (None, false));
}

#[test]
fn load_or_store_idempotence() {
    let m = Map::new();
    assert_eq!(m.load_or_store(1, "first"), ("first", false));
    assert_eq!(m.load_or_store(1, "second"), ("first", true));
    assert_eq!(m.len(), 1);
    assert_eq!(m.load(&1), Some("first"));
}

#[test]
fn create_capacity_zero() {
    let m = Map::with_capacity(0);
    assert_eq!(m.load_or_store(1, 1), (1, false));
    assert_eq!(m.load(&1), Some(1));
    assert_eq!(m.load(&0), None);
}

#[test]
fn clear_empties_the_map() {
    let m = Map::new();
    m.store(1, 2);
    m.store(2, 4);
    assert_eq!(m.len(), 2);

    m.clear();

    assert!(m.is_empty());
    assert_eq!(m.len(), 0);
    assert_eq!(m.load(&1), None);
    assert_eq!(m.load(&2), None);
}

#[test]
fn retain_keeps_only_matching_entries() {
    let m = Map::new();
    for (k, v) in [(1, 8), (2, 9), (3, 4), (4, 7), (5, 2), (6, 5), (7, 2), (8, 3)] {
        m.store(k, v);
    }

    m.retain(|key, val| key % 2 == 0 && val % 2 == 1);

    assert_eq!(m.len(), 4);
    m.range(|key, val| {
        assert_eq!(key % 2, 0);
        assert_eq!(val % 2, 1);
        true
    });
}

#[test]
fn range_visits_every_distinct_key() {
    let m = Map::new();
    for i in 0..2000 {
        m.store(i, i);
    }
    assert_eq!(m.len(), 2000);
    assert_eq!(m.load(&1234), Some(1234));

    let mut seen = std::collections::HashSet::new();
    m.range(|k, v| {
        assert_eq!(k, v);
        seen.insert(*k);
        true
    });
    assert_eq!(seen.len(), 2000);
}

#[test]
fn range_can_stop_early() {
    let m = Map::new();
    for i in 0..100 {
        m.store(i, i);
    }
    let mut visited = 0;
    m.range(|_, _| {
        visited += 1;
        visited < 10
    });
    assert_eq!(visited, 10);
}

#[test]
fn lots_of_insertions_cross_several_resizes() {
    init_logger();
    let m = Map::new();
    for i in 0..20_000 {
        assert_eq!(m.load_or_store(i, i * 2), (i * 2, false));
    }
    assert_eq!(m.len(), 20_000);
    for i in (0..20_000).step_by(97) {
        assert_eq!(m.load(&i), Some(i * 2));
    }
    for i in 0..10_000 {
        assert_eq!(m.load_and_delete(&i), (Some(i * 2), true));
    }
    assert_eq!(m.len(), 10_000);
    for i in 0..10_000 {
        assert_eq!(m.load(&i), None);
    }
    for i in 10_000..20_000 {
        assert_eq!(m.load(&i), Some(i * 2));
    }
}

#[test]
fn shrinks_back_down_after_bulk_removal() {
    init_logger();
    let m = Map::new();
    for i in 0..5_000 {
        m.store(i, i);
    }
    for i in 0..4_990 {
        m.delete(&i);
    }
    assert_eq!(m.len(), 10);
    for i in 4_990..5_000 {
        assert_eq!(m.load(&i), Some(i));
    }
}

#[test]
fn concurrent_store_then_concurrent_delete() {
    let m = Arc::new(Map::new());
    let mut joins = Vec::new();

    for t in 0..8 {
        let m = m.clone();
        joins.push(thread::spawn(move || {
            for i in t * 1000..(t + 1) * 1000 {
                m.store(i, i);
            }
        }));
    }
    for j in joins.drain(..) {
        j.join().unwrap();
    }

    assert_eq!(m.len(), 8000);
    let mut seen = std::collections::HashSet::new();
    m.range(|k, v| {
        assert_eq!(k, v);
        seen.insert(*k);
        true
    });
    assert_eq!(seen.len(), 8000);

    for t in 0..8 {
        let m = m.clone();
        joins.push(thread::spawn(move || {
            for i in t * 1000..(t + 1) * 1000 {
                m.delete(&i);
            }
        }));
    }
    for j in joins {
        j.join().unwrap();
    }

    assert!(m.is_empty());
    assert_eq!(m.len(), 0);
}

#[test]
fn lock_compete_on_one_key() {
    let m = Arc::new(Map::new());
    m.store("hey", "nah");

    let a = {
        let m = m.clone();
        thread::spawn(move || m.store("hey", "hi"))
    };
    let b = {
        let m = m.clone();
        thread::spawn(move || m.store("hey", "hi"))
    };

    a.join().unwrap();
    b.join().unwrap();

    assert_eq!(m.load(&"hey"), Some("hi"));
}

#[test]
fn simultaneous_growth_triggers() {
    let m = Arc::new(Map::new());
    let mut joins = Vec::new();

    for t in 0..10 {
        let m = m.clone();
        joins.push(thread::spawn(move || {
            for i in t * 500..(t + 1) * 500 {
                m.store(i, i);
            }
        }));
    }

    for j in joins {
        j.join().unwrap();
    }

    assert_eq!(m.len(), 5000);
    for i in (0..5000).step_by(37) {
        assert_eq!(m.load(&i), Some(i));
    }
}

#[test]
fn load_or_store_under_contention_agrees_on_one_winner() {
    let m = Arc::new(Map::new());
    let mut joins = Vec::new();

    for t in 0..16 {
        let m = m.clone();
        joins.push(thread::spawn(move || m.load_or_store(42, t)));
    }

    let results: Vec<(i32, bool)> = joins.into_iter().map(|j| j.join().unwrap()).collect();

    let winners: Vec<_> = results.iter().filter(|(_, loaded)| !loaded).collect();
    assert_eq!(winners.len(), 1);
    let winning_value = winners[0].0;

    for (value, loaded) in &results {
        if *loaded {
            assert_eq!(*value, winning_value);
        }
    }
    assert_eq!(m.len(), 1);
    assert_eq!(m.load(&42), Some(winning_value));
}

#[test]
fn concurrent_range_never_sees_a_key_twice() {
    let m = Arc::new(Map::new());
    for i in 0..1000 {
        m.store(i, i);
    }

    let writer = {
        let m = m.clone();
        thread::spawn(move || {
            for round in 1..50 {
                for i in 0..1000 {
                    m.store(i, i * round);
                }
            }
        })
    };

    for _ in 0..20 {
        let mut seen = std::collections::HashSet::new();
        m.range(|k, v| {
            if *k != 0 {
                assert_eq!(*v % *k, 0);
            }
            assert!(seen.insert(*k));
            true
        });
    }

    writer.join().unwrap();
}

#[test]
fn matches_a_reference_hashmap_under_random_operations() {
    let m = Map::new();
    let mut reference: HashMap<u32, u32> = HashMap::new();
    let mut rng = rand::thread_rng();

    for _ in 0..20_000 {
        let key = rng.gen_range(0..500);
        match rng.gen_range(0..4) {
            0 => {
                let value = rng.gen();
                m.store(key, value);
                reference.insert(key, value);
            }
            1 => {
                assert_eq!(m.load(&key), reference.get(&key).copied());
            }
            2 => {
                let value = rng.gen();
                let got = m.load_or_store(key, value);
                let expected = match reference.get(&key) {
                    Some(existing) => (*existing, true),
                    None => {
                        reference.insert(key, value);
                        (value, false)
                    }
                };
                assert_eq!(got, expected);
            }
            _ => {
                let got = m.load_and_delete(&key);
                let expected = match reference.remove(&key) {
                    Some(v) => (Some(v), true),
                    None => (None, false),
                };
                assert_eq!(got, expected);
            }
        }
    }

    assert_eq!(m.len(), reference.len());
    for (k, v) in &reference {
        assert_eq!(m.load(k), Some(*v));
    }
}

#[test]
fn churn_leaves_no_residue() {
    let m = Map::new();
    for round in 0..500 {
        m.store(round, round);
        assert_eq!(m.load_and_delete(&round), (Some(round), true));
    }
    assert!(m.is_empty());
    assert_eq!(m.len(), 0);
    m.range(|_, _| panic!("no entry should survive churn"));
}

thread_local! { static DROP_VECTOR: RefCell<Vec<isize>> = RefCell::new(Vec::new()); }

#[derive(Hash, PartialEq, Eq)]
struct Dropable {
    k: usize,
}

impl Dropable {
    fn new(k: usize) -> Dropable {
        DROP_VECTOR.with(|slot| {
            slot.borrow_mut()[k] += 1;
        });
        Dropable { k }
    }
}

impl Drop for Dropable {
    fn drop(&mut self) {
        DROP_VECTOR.with(|slot| {
            slot.borrow_mut()[self.k] -= 1;
        });
    }
}

impl Clone for Dropable {
    fn clone(&self) -> Dropable {
        Dropable::new(self.k)
    }
}

#[test]
fn drops_run_exactly_once_per_entry() {
    DROP_VECTOR.with(|slot| {
        *slot.borrow_mut() = vec![0; 200];
    });

    let m = Map::new();

    for i in 0..100 {
        let key = Dropable::new(i);
        let value = Dropable::new(i + 100);
        m.store(key, value);
    }

    DROP_VECTOR.with(|slot| {
        for i in 0..200 {
            assert_eq!(slot.borrow()[i], 1);
        }
    });

    for i in 0..50 {
        let lookup = Dropable::new(i);
        let (removed, loaded) = m.load_and_delete(&lookup);
        assert!(loaded);
        assert!(removed.is_some());

        DROP_VECTOR.with(|slot| {
            assert_eq!(slot.borrow()[i], 1);
            assert_eq!(slot.borrow()[i + 100], 1);
        });
    }

    DROP_VECTOR.with(|slot| {
        for i in 0..50 {
            assert_eq!(slot.borrow()[i], 0);
            assert_eq!(slot.borrow()[i + 100], 0);
        }
        for i in 50..100 {
            assert_eq!(slot.borrow()[i], 1);
            assert_eq!(slot.borrow()[i + 100], 1);
        }
    });

    m.clear();

    DROP_VECTOR.with(|slot| {
        for i in 0..200 {
            assert_eq!(slot.borrow()[i], 0);
        }
    });
}

#[test]
fn from_iterator_collects_every_pair() {
    let pairs: Vec<(i32, i32)> = (0..50).map(|i| (i, i * i)).collect();
    let m: Map<i32, i32> = pairs.iter().copied().collect();

    assert_eq!(m.len(), 50);
    for (k, v) in &pairs {
        assert_eq!(m.load(k), Some(*v));
    }
}

#[test]
fn debug_format_is_map_like() {
    let m = Map::new();
    m.store(1, "one");
    let formatted = format!("{:?}", m);
    assert!(formatted.contains('1'));
    assert!(formatted.contains("one"));
}

#[test]
fn default_constructs_an_empty_map() {
    let m: Map<i32, i32> = Default::default();
    assert!(m.is_empty());
}

#[test]
fn shared_mutex_reference_cross_check_with_custom_hasher() {
    use std::collections::hash_map::RandomState;

    let m = Map::with_hasher(RandomState::new());
    let reference = Mutex::new(HashMap::new());

    for i in 0..300 {
        m.store(i, i.to_string());
        reference.lock().unwrap().insert(i, i.to_string());
    }

    for i in 0..300 {
        assert_eq!(m.load(&i), reference.lock().unwrap().get(&i).cloned());
    }
}
