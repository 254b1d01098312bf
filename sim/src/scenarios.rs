//! Scenario definitions.
//!
//! Each scenario is a named configuration of targets and cameras over a
//! shared ground plane. All scenarios are deterministic given the same seed.

use crate::{
    camera_sim::{random_appearance, CameraParams, CameraSimulator, CameraView, SimCamera},
    replay::ReplayLog,
    target::{MotionSpec, Target},
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracker_core::{types::CameraId, TrackingConfig};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// 3 people walking across two side-by-side cameras with an overlap strip
    Handoff,
    /// 6 people wandering under 3 mutually overlapping cameras
    Overlap,
    /// 4 people under 2 cameras with missing embeddings, dropped and late frames
    Dropout,
    /// 40 people, 4 cameras; scalability stress test
    Crowd,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    /// Seconds
    pub duration: f64,
    /// Cycle period, seconds
    pub dt: f64,
    /// Physical box size [w, h], metres
    pub target_size: [f64; 2],
    pub targets: Vec<Target>,
    pub cameras: Vec<SimCamera>,
    /// Suggested cosine threshold for this scenario's appearance spread
    pub match_threshold: f64,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Handoff => Self::handoff(seed),
            ScenarioKind::Overlap => Self::overlap(seed),
            ScenarioKind::Dropout => Self::dropout(seed),
            ScenarioKind::Crowd => Self::crowd(seed),
        }
    }

    pub fn n_cycles(&self) -> u64 {
        (self.duration / self.dt).round() as u64
    }

    /// Operating point suited to this scenario's cameras and frame rate.
    pub fn tracking_config(&self) -> TrackingConfig {
        let mut cfg = TrackingConfig {
            camera_count: self.cameras.len(),
            max_frame_lag: 5.0 * self.dt,
            ..Default::default()
        };
        cfg.tracker.lifecycle.n_init = 3;
        cfg.tracker.lifecycle.max_age = 10;
        cfg.tracker.lifecycle.lost_grace = 20;
        cfg.reid.match_threshold = self.match_threshold;
        cfg.reid.identity_gc_timeout = 50;
        cfg
    }

    /// Run targets and cameras for the whole duration.
    pub fn record(&self) -> ReplayLog {
        let mut targets = self.targets.clone();
        let mut sim = CameraSimulator::new(self.cameras.clone(), self.target_size, self.seed);
        let n = self.n_cycles();
        let mut batches = Vec::with_capacity(n as usize);
        let mut ground_truth = Vec::with_capacity(n as usize);

        for cycle in 0..n {
            let t = cycle as f64 * self.dt;
            let (batch, truth) = sim.generate_batch(&targets, cycle, t);
            batches.push(batch);
            ground_truth.push(truth);
            for target in &mut targets {
                target.step(t, self.dt);
            }
        }
        info!(
            scenario = %self.name,
            seed = self.seed,
            cycles = n,
            cameras = self.cameras.len(),
            targets = self.targets.len(),
            "scenario recorded"
        );

        ReplayLog {
            scenario_name: self.name.clone(),
            seed: self.seed,
            dt: self.dt,
            camera_count: self.cameras.len(),
            batches,
            ground_truth,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Handoff
    // -----------------------------------------------------------------------
    fn handoff(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        let dim = 32;
        let targets = [(4.0, 1.3), (10.0, 1.5), (16.0, 1.1)]
            .into_iter()
            .enumerate()
            .map(|(i, (y, speed))| {
                let appearance = random_appearance(&mut rng, dim);
                let mut t = walker(i as u64, [1.0, y], [speed, 0.0], appearance);
                t.appear_at = Some(i as f64 * 2.0);
                t
            })
            .collect();

        let cameras = vec![
            camera(0, [0.0, 0.0], [24.0, 20.0], 20.0, CameraParams::default()),
            camera(1, [16.0, 0.0], [24.0, 20.0], 20.0, CameraParams::default()),
        ];

        Scenario {
            name: "handoff".into(),
            seed,
            duration: 30.0,
            dt: 0.1,
            target_size: [0.6, 1.7],
            targets,
            cameras,
            match_threshold: 0.6,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Overlap
    // -----------------------------------------------------------------------
    fn overlap(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(2));
        let dim = 32;
        let arena = [0.0, 0.0, 32.0, 22.0];
        let targets = (0..6)
            .map(|i| {
                let appearance = random_appearance(&mut rng, dim);
                let (pos, vel) = random_walker(&mut rng, arena);
                let mut t = walker(i, pos, vel, appearance);
                if i % 2 == 1 {
                    t.motion = MotionSpec::ConstantTurn {
                        omega: (rng.gen::<f64>() - 0.5) * 0.4,
                    };
                }
                t.bounds = Some(arena);
                t
            })
            .collect();

        let cameras = vec![
            camera(0, [0.0, 0.0], [24.0, 16.0], 20.0, CameraParams::default()),
            camera(1, [8.0, 0.0], [24.0, 16.0], 18.0, CameraParams::default()),
            camera(2, [4.0, 6.0], [24.0, 16.0], 22.0, CameraParams::default()),
        ];

        Scenario {
            name: "overlap".into(),
            seed,
            duration: 40.0,
            dt: 0.1,
            target_size: [0.6, 1.7],
            targets,
            cameras,
            match_threshold: 0.6,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Dropout
    // -----------------------------------------------------------------------
    fn dropout(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(3));
        let dim = 32;
        let arena = [0.0, 0.0, 30.0, 20.0];
        let targets = (0..4)
            .map(|i| {
                let appearance = random_appearance(&mut rng, dim);
                let (pos, vel) = random_walker(&mut rng, arena);
                let mut t = walker(i, pos, vel, appearance);
                t.bounds = Some(arena);
                t
            })
            .collect();

        let faulty = CameraParams {
            p_missing_embedding: 0.3,
            p_frame_drop: 0.05,
            p_frame_stale: 0.05,
            stale_lag: 1.0,
            ..Default::default()
        };
        let cameras = vec![
            camera(0, [0.0, 0.0], [30.0, 20.0], 20.0, CameraParams::default()),
            camera(1, [0.0, 0.0], [30.0, 20.0], 15.0, faulty),
        ];

        Scenario {
            name: "dropout".into(),
            seed,
            duration: 40.0,
            dt: 0.1,
            target_size: [0.6, 1.7],
            targets,
            cameras,
            match_threshold: 0.6,
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 4: Crowd
    // -----------------------------------------------------------------------
    fn crowd(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(4));
        let dim = 64;
        let arena = [0.0, 0.0, 60.0, 40.0];
        let targets = (0..40)
            .map(|i| {
                let appearance = random_appearance(&mut rng, dim);
                let (pos, vel) = random_walker(&mut rng, arena);
                let mut t = walker(i, pos, vel, appearance);
                if rng.gen::<f64>() < 0.3 {
                    t.motion = MotionSpec::ConstantTurn {
                        omega: (rng.gen::<f64>() - 0.5) * 0.3,
                    };
                }
                t.bounds = Some(arena);
                t
            })
            .collect();

        // Four quadrant cameras overlapping by 10 m in each direction
        let cameras = (0..4u32)
            .map(|i| {
                let origin = [(i % 2) as f64 * 25.0, (i / 2) as f64 * 15.0];
                camera(i, origin, [35.0, 25.0], 16.0, CameraParams::default())
            })
            .collect();

        Scenario {
            name: "crowd".into(),
            seed,
            duration: 60.0,
            dt: 0.1,
            target_size: [0.6, 1.7],
            targets,
            cameras,
            match_threshold: 0.65,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder helpers
// ---------------------------------------------------------------------------

fn walker(id: u64, pos: [f64; 2], vel: [f64; 2], appearance: Vec<f64>) -> Target {
    Target {
        id,
        state: [pos[0], pos[1], vel[0], vel[1]],
        motion: MotionSpec::ConstantVelocity,
        label: "person".into(),
        appearance,
        bounds: None,
        appear_at: None,
        disappear_at: None,
    }
}

/// Uniform position inside `arena` and a walking-speed velocity.
fn random_walker(rng: &mut ChaCha8Rng, arena: [f64; 4]) -> ([f64; 2], [f64; 2]) {
    let x = arena[0] + rng.gen::<f64>() * (arena[2] - arena[0]);
    let y = arena[1] + rng.gen::<f64>() * (arena[3] - arena[1]);
    let speed = 0.5 + rng.gen::<f64>() * 1.3;
    let heading = rng.gen::<f64>() * std::f64::consts::TAU;
    ([x, y], [speed * heading.cos(), speed * heading.sin()])
}

fn camera(id: u32, origin: [f64; 2], extent: [f64; 2], scale: f64, params: CameraParams) -> SimCamera {
    SimCamera {
        id: CameraId(id),
        view: CameraView {
            origin,
            extent,
            scale,
        },
        params,
    }
}
