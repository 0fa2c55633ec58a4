use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::{BTreeMap, VecDeque};

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 5)]
    Insert(#[proptest(strategy = "0u16..256")] u16, u32),
    #[proptest(weight = 4)]
    Delete(#[proptest(strategy = "0u16..256")] u16),
    #[proptest(weight = 2)]
    Search(#[proptest(strategy = "0u16..256")] u16),
}

/// Size-aware mapper that only ever uses the lower half of the table, so
/// buckets hold deep trees and the drain scan has empty slots to skip.
fn clustered(k: &u16, table_size: usize) -> usize {
    (*k as usize).wrapping_mul(7) % (table_size / 2 + 1)
}

type Clustered = fn(&u16, usize) -> usize;

fn config_strategy(allow_duplicates: bool) -> impl Strategy<Value = Config> {
    (
        0usize..8,
        prop::sample::select(vec![0.5, 0.75, 1.0, 2.0, 4.0]),
        2usize..5,
    )
        .prop_map(move |(initial_capacity, load_factor, resize_factor)| Config {
            initial_capacity,
            load_factor,
            resize_factor,
            allow_duplicates,
        })
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(any::<Op>(), 0..=600)
}

fn new_table(config: Config) -> DynamicHashTable<u16, u32, Clustered> {
    DynamicHashTable::with_config(clustered as Clustered, config)
        .expect("strategy only produces valid configs")
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_unique_keys(config in config_strategy(false), ops in ops_strategy()) {
        let mut t = new_table(config);
        let mut m: BTreeMap<u16, u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    let expected = if m.contains_key(&k) {
                        Err(Error::DuplicateKey)
                    } else {
                        m.insert(k, v);
                        Ok(())
                    };
                    prop_assert_eq!(t.insert(k, v), expected);
                }
                Op::Delete(k) => {
                    let expected = m.remove(&k).ok_or(Error::KeyNotFound);
                    prop_assert_eq!(t.delete(&k), expected);
                    prop_assert!(!t.exists(&k));
                }
                Op::Search(k) => {
                    prop_assert_eq!(t.search(&k).ok(), m.get(&k));
                    prop_assert_eq!(t.exists(&k), m.contains_key(&k));
                }
            }

            prop_assert_eq!(t.len(), m.len());
            prop_assert!(t.capacity() >= t.config().capacity_floor());
            t.validate();
        }

        for (k, v) in &m {
            prop_assert_eq!(t.search(k), Ok(v));
        }
    }

    #[test]
    fn prop_equivalence_duplicate_keys(config in config_strategy(true), ops in ops_strategy()) {
        let mut t = new_table(config);
        // Values per key, oldest first.
        let mut m: BTreeMap<u16, VecDeque<u32>> = BTreeMap::new();
        let mut len = 0usize;

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    prop_assert_eq!(t.insert(k, v), Ok(()));
                    m.entry(k).or_default().push_back(v);
                    len += 1;
                }
                Op::Delete(k) => {
                    // Delete must remove exactly the entry search reports.
                    let searched = t.search(&k).ok().copied();
                    let deleted = t.delete(&k).ok();
                    prop_assert_eq!(searched, deleted);

                    let expected = m.get_mut(&k).and_then(VecDeque::pop_front);
                    if m.get(&k).is_some_and(VecDeque::is_empty) {
                        m.remove(&k);
                    }
                    if expected.is_some() {
                        len -= 1;
                    }
                    prop_assert_eq!(deleted, expected);
                }
                Op::Search(k) => {
                    let expected = m.get(&k).and_then(|vs| vs.front());
                    prop_assert_eq!(t.search(&k).ok(), expected);
                }
            }

            prop_assert_eq!(t.len(), len);
            t.validate();
        }
    }

    #[test]
    fn prop_tree_invariants(
        ops in prop::collection::vec((any::<bool>(), 0u8..64), 0..=400)
    ) {
        let mut t: RbTree<u8, usize> = RbTree::new();
        let mut m: BTreeMap<u8, VecDeque<usize>> = BTreeMap::new();

        for (i, (insert, k)) in ops.into_iter().enumerate() {
            if insert {
                t.insert(k, i);
                m.entry(k).or_default().push_back(i);
            } else {
                let expected = m.get_mut(&k).and_then(VecDeque::pop_front);
                if m.get(&k).is_some_and(VecDeque::is_empty) {
                    m.remove(&k);
                }
                prop_assert_eq!(t.delete(&k).ok(), expected);
            }

            if let Err(e) = t.check() {
                return Err(TestCaseError::fail(e));
            }
        }

        let got: Vec<(u8, usize)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(u8, usize)> = m
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (*k, *v)))
            .collect();
        prop_assert_eq!(got, expected);
    }
}

#[test]
fn resize_transparency_every_step() {
    // Keys inserted before, during and after each resize stay reachable.
    let mut t = new_table(Config {
        initial_capacity: 1,
        ..Config::default()
    });
    for k in 0..300u16 {
        t.insert(k, u32::from(k) * 2).unwrap();
        for j in 0..=k {
            assert_eq!(t.search(&j), Ok(&(u32::from(j) * 2)), "after inserting {k}");
        }
    }
    assert!(t.stats().expansions > 0);

    for k in (0..300u16).rev() {
        t.delete(&k).unwrap();
        for j in 0..k {
            assert!(t.exists(&j), "{j} lost after deleting {k}");
        }
        assert!(!t.exists(&k));
    }
    assert!(t.stats().contractions > 0);
    t.validate();
}
