//! Property tests over chains, versions and garbage collection.

use proptest::prelude::*;
use ssidb_core::{DataContainer, EntryCreationVersion, Key, ReadWindowVersion, Value};
use ssidb_testkit::prelude::*;

fn committed(values: &[Value]) -> (DataContainer, Key) {
    let container = DataContainer::new(4);
    let key = Key::from("k");
    for (index, value) in values.iter().enumerate() {
        let scalar = index as i64 + 1;
        let version = EntryCreationVersion::new(TEST_VIEW, 0, scalar, 0, vec![scalar]);
        container
            .write(&key, Some(value.clone()), Some(version), false, None)
            .unwrap();
    }
    (container, key)
}

fn visible_version(container: &DataContainer, key: &Key, bound: i64) -> Option<i64> {
    let window = ReadWindowVersion::new(TEST_VIEW, 0, bound, false);
    container
        .read(key, Some(&window), 0)
        .version
        .map(|version| version.version())
}

proptest! {
    #[test]
    fn lookups_never_go_back_in_time(
        values in history_strategy(12),
        a in 0i64..16,
        b in 0i64..16,
    ) {
        let (container, key) = committed(&values);
        let (low, high) = (a.min(b), a.max(b));
        prop_assert!(visible_version(&container, &key, low) <= visible_version(&container, &key, high));
    }

    #[test]
    fn a_write_is_read_back_until_the_next_commit(values in history_strategy(12)) {
        let (container, key) = committed(&values);
        for (index, value) in values.iter().enumerate() {
            let window = ReadWindowVersion::new(TEST_VIEW, 0, index as i64 + 1, false);
            let entry = container.read(&key, Some(&window), 0);
            prop_assert_eq!(entry.value(), Some(value));
            prop_assert_eq!(entry.most_recent, index + 1 == values.len());
        }
    }

    #[test]
    fn comparison_is_antisymmetric(a in version_strategy(3), b in version_strategy(3)) {
        prop_assert_eq!(a.compare(&b).unwrap(), b.compare(&a).unwrap().reverse());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn gc_never_changes_what_a_live_reader_sees(
        values in history_strategy(8),
        split in any::<prop::sample::Index>(),
    ) {
        let cluster = TestCluster::builder().nodes(1).build();
        let coordinator = cluster.coordinator(0);
        let key = Key::from("k");
        let split = split.index(values.len());

        let commit = |value: &Value| {
            let mut tx = coordinator.begin().unwrap();
            coordinator.write(&mut tx, key.clone(), value.clone()).unwrap();
            coordinator.commit(&mut tx).unwrap();
        };
        for value in &values[..=split] {
            commit(value);
        }

        let mut reader = coordinator.begin().unwrap();
        let before = coordinator.read(&mut reader, &key).unwrap();
        prop_assert_eq!(before.as_ref(), Some(&values[split]));

        for value in &values[split + 1..] {
            commit(value);
        }
        cluster.collect_garbage();

        let after = coordinator.read(&mut reader, &key).unwrap();
        prop_assert_eq!(after, before);
        let latest = cluster.read_latest("k");
        prop_assert_eq!(latest.as_ref(), values.last());
        prop_assert!(cluster.node(0).container().history(&key).len() <= values.len() - split + 1);
    }
}
