//! Benchmark utilities.

use rand::Rng;
use ssidb_core::{DataContainer, DistributedVersion, EntryCreationVersion, Key, ViewId};

/// View used by every benchmark.
pub const BENCH_VIEW: ViewId = ViewId::new(1);

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a random vector of `members` coordinates below `max`.
pub fn random_version(members: usize, max: i64) -> DistributedVersion {
    let mut rng = rand::thread_rng();
    DistributedVersion::new(BENCH_VIEW, (0..members).map(|_| rng.gen_range(0..max)).collect())
}

/// Builds a single-node container holding `depth` versions of one key.
pub fn deep_chain(depth: i64, payload_size: usize) -> (DataContainer, Key) {
    let container = DataContainer::new(1);
    let key = Key::from("bench");
    for version in 1..=depth {
        container
            .write(
                &key,
                Some(random_data(payload_size)),
                Some(EntryCreationVersion::new(
                    BENCH_VIEW,
                    0,
                    version,
                    0,
                    vec![version],
                )),
                false,
                None,
            )
            .unwrap();
    }
    (container, key)
}
