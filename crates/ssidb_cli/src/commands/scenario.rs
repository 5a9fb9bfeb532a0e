//! Scenario command implementation.
//!
//! Each scenario runs on a fresh two-node cluster with `x` on `n0` and `y`
//! on `n1`, printing every step and the outcome of the contested commit.

use super::CommandError;
use ssidb_core::{CoreConfig, CoreResult, Key, LocalCluster, Transaction, Value};

/// How the contested transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// It committed.
    Committed,
    /// It aborted with the given error.
    Aborted(String),
}

struct Replay {
    cluster: LocalCluster,
}

impl Replay {
    fn new(config: CoreConfig) -> CoreResult<Self> {
        let cluster = LocalCluster::builder()
            .nodes(2)
            .config(config)
            .place("x", &[0])
            .place("y", &[1])
            .build()?;
        Ok(Self { cluster })
    }

    fn begin(&self, name: &str) -> CoreResult<Transaction> {
        let tx = self.cluster.coordinator(0).begin()?;
        println!("  {name}: begin at {}", tx.begin_version());
        Ok(tx)
    }

    fn read(&self, name: &str, tx: &mut Transaction, key: &str) -> CoreResult<Option<Value>> {
        let value = self.cluster.coordinator(0).read(tx, &Key::from(key))?;
        println!("  {name}: read {key} = {}", show(value.as_deref()));
        Ok(value)
    }

    fn write(&self, name: &str, tx: &mut Transaction, key: &str, value: &str) -> CoreResult<()> {
        println!("  {name}: write {key} = {value}");
        self.cluster
            .coordinator(0)
            .write(tx, Key::from(key), value.as_bytes().to_vec())
    }

    fn commit(&self, name: &str, tx: &mut Transaction) -> Outcome {
        match self.cluster.coordinator(0).commit(tx) {
            Ok(version) => {
                println!("  {name}: committed at {version}");
                Outcome::Committed
            }
            Err(err) => {
                println!("  {name}: aborted ({err})");
                Outcome::Aborted(err.to_string())
            }
        }
    }

    fn setup(&self, writes: &[(&str, &str)]) -> CoreResult<()> {
        let coordinator = self.cluster.coordinator(1);
        let mut tx = coordinator.begin()?;
        for (key, value) in writes {
            coordinator.write(&mut tx, Key::from(*key), value.as_bytes().to_vec())?;
        }
        let version = coordinator.commit(&mut tx)?;
        println!("  setup: committed {writes:?} at {version}");
        Ok(())
    }

    fn finish(&self) -> CoreResult<()> {
        println!();
        for key in ["x", "y"] {
            let value = self.cluster.read_latest(&Key::from(key))?;
            println!("  final {key} = {}", show(value.as_deref()));
        }
        Ok(())
    }
}

fn show(value: Option<&[u8]>) -> String {
    value.map_or_else(
        || "<absent>".to_string(),
        |bytes| String::from_utf8_lossy(bytes).into_owned(),
    )
}

/// A concurrent writer overwrites what T1 read, then T1 writes elsewhere.
fn stale_read(replay: &Replay) -> CoreResult<Outcome> {
    replay.setup(&[("x", "1"), ("y", "1")])?;
    let mut t1 = replay.begin("T1")?;
    replay.read("T1", &mut t1, "x")?;
    replay.setup(&[("x", "2"), ("y", "2")])?;
    replay.write("T1", &mut t1, "y", "3")?;
    Ok(replay.commit("T1", &mut t1))
}

/// Two transactions each read both keys and clear a different one.
fn write_skew(replay: &Replay) -> CoreResult<Outcome> {
    replay.setup(&[("x", "1"), ("y", "1")])?;
    let mut t1 = replay.begin("T1")?;
    let mut t2 = replay.begin("T2")?;
    for (name, tx) in [("T1", &mut t1), ("T2", &mut t2)] {
        replay.read(name, tx, "x")?;
        replay.read(name, tx, "y")?;
    }
    replay.write("T1", &mut t1, "x", "0")?;
    replay.write("T2", &mut t2, "y", "0")?;
    replay.commit("T1", &mut t1);
    Ok(replay.commit("T2", &mut t2))
}

/// Two transactions increment the same counter.
fn lost_update(replay: &Replay) -> CoreResult<Outcome> {
    replay.setup(&[("x", "1")])?;
    let mut t1 = replay.begin("T1")?;
    let mut t2 = replay.begin("T2")?;
    replay.read("T1", &mut t1, "x")?;
    replay.read("T2", &mut t2, "x")?;
    replay.write("T1", &mut t1, "x", "2")?;
    replay.write("T2", &mut t2, "x", "2")?;
    replay.commit("T1", &mut t1);
    Ok(replay.commit("T2", &mut t2))
}

/// Replays `name` and returns the outcome of its last commit.
pub fn replay(config: CoreConfig, name: &str) -> Result<Outcome, Box<dyn std::error::Error>> {
    let scenario: fn(&Replay) -> CoreResult<Outcome> = match name {
        "stale-read" => stale_read,
        "write-skew" => write_skew,
        "lost-update" => lost_update,
        other => return Err(CommandError::UnknownScenario(other.to_string()).into()),
    };
    println!(
        "Scenario {name} ({}, {})",
        config.validation_mode, config.ordering_mode
    );
    println!();
    let replay = Replay::new(config)?;
    let outcome = scenario(&replay)?;
    replay.finish()?;
    Ok(outcome)
}

/// Runs the scenario command.
pub fn run(config: CoreConfig, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = replay(config, name)?;
    tracing::debug!(?outcome, "scenario finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssidb_core::ValidationMode;

    fn aborted(outcome: &Outcome) -> bool {
        matches!(outcome, Outcome::Aborted(_))
    }

    #[test]
    fn every_scenario_aborts_the_contested_commit() {
        for mode in [ValidationMode::Ssi, ValidationMode::Plain] {
            for name in ["stale-read", "write-skew", "lost-update"] {
                let outcome = replay(CoreConfig::default().validation_mode(mode), name).unwrap();
                assert!(aborted(&outcome), "{mode} {name}: {outcome:?}");
            }
        }
    }

    #[test]
    fn unknown_scenario_is_an_error() {
        assert!(replay(CoreConfig::default(), "phantom").is_err());
    }
}
