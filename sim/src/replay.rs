//! Replay: serialize/deserialize recorded frame batches for offline runs.

use crate::camera_sim::GroundTruthFrame;
use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracker_core::types::FrameBatch;

/// A full recorded simulation log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayLog {
    pub scenario_name: String,
    pub seed: u64,
    /// Cycle period, seconds
    pub dt: f64,
    pub camera_count: usize,
    /// One batch per cycle, in order
    pub batches: Vec<FrameBatch>,
    /// Ground truth per cycle, parallel to `batches`
    pub ground_truth: Vec<GroundTruthFrame>,
}

impl ReplayLog {
    /// Check the log is internally consistent before it is replayed.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.batches.len() == self.ground_truth.len(),
            "{} batches but {} ground-truth frames",
            self.batches.len(),
            self.ground_truth.len()
        );
        ensure!(self.camera_count > 0, "replay log declares no cameras");
        for pair in self.batches.windows(2) {
            ensure!(
                pair[1].cycle > pair[0].cycle,
                "cycle {} follows cycle {}",
                pair[1].cycle,
                pair[0].cycle
            );
        }
        Ok(())
    }
}

/// Save a replay log to a JSON file.
pub fn save_replay(log: &ReplayLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating replay file {}", path.display()))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer(writer, log)?;
    Ok(())
}

/// Load a replay log from a JSON file.
pub fn load_replay(path: &Path) -> anyhow::Result<ReplayLog> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening replay file {}", path.display()))?;
    let reader = BufReader::new(file);
    let log: ReplayLog = serde_json::from_reader(reader)
        .with_context(|| format!("parsing replay file {}", path.display()))?;
    log.validate()?;
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{Scenario, ScenarioKind};

    #[test]
    fn save_then_load_preserves_batches() {
        let log = Scenario::build(ScenarioKind::Handoff, 1).record();
        let path = std::env::temp_dir().join(format!("mcmot_replay_{}.json", std::process::id()));
        save_replay(&log, &path).unwrap();
        let back = load_replay(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.scenario_name, "handoff");
        assert_eq!(back.batches.len(), log.batches.len());
        assert_eq!(
            serde_json::to_string(&back.batches[42]).unwrap(),
            serde_json::to_string(&log.batches[42]).unwrap()
        );
    }

    #[test]
    fn inconsistent_log_rejected() {
        let mut log = Scenario::build(ScenarioKind::Handoff, 1).record();
        log.ground_truth.pop();
        assert!(log.validate().is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_replay(Path::new("/nonexistent/replay.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/replay.json"));
    }
}
