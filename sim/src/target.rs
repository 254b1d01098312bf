//! Ground-plane target trajectories.
//!
//! Each target has a true state [px, py, vx, vy] in metres on a shared floor
//! plane, a `MotionSpec`, and a fixed appearance vector that the camera
//! simulator perturbs into per-detection embeddings.

use serde::{Deserialize, Serialize};

/// Describes how a target moves.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MotionSpec {
    /// Constant velocity.
    ConstantVelocity,
    /// Constant turn rate; `omega` in rad/s.
    ConstantTurn { omega: f64 },
    /// Head toward the first waypoint whose time has not passed.
    Waypoints {
        /// (t, x, y)
        waypoints: Vec<[f64; 3]>,
        speed: f64,
    },
}

/// A simulated person/object with ground-truth state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    /// Unique target ID (used for metrics)
    pub id: u64,
    /// True state [px, py, vx, vy]
    pub state: [f64; 4],
    pub motion: MotionSpec,
    /// Class label reported by the detector
    pub label: String,
    /// Unit-norm appearance vector
    pub appearance: Vec<f64>,
    /// Reflect off this rectangle [x_min, y_min, x_max, y_max] when set
    pub bounds: Option<[f64; 4]>,
    pub appear_at: Option<f64>,
    pub disappear_at: Option<f64>,
}

impl Target {
    /// Propagate true state by `dt` seconds.
    pub fn step(&mut self, t: f64, dt: f64) {
        let s = &mut self.state;
        match &self.motion {
            MotionSpec::ConstantVelocity => {}
            MotionSpec::ConstantTurn { omega } => {
                let v = s[2].hypot(s[3]);
                let heading = s[3].atan2(s[2]) + omega * dt;
                s[2] = v * heading.cos();
                s[3] = v * heading.sin();
            }
            MotionSpec::Waypoints { waypoints, speed } => {
                match waypoints.iter().find(|wp| wp[0] >= t) {
                    Some(wp) => {
                        let (dx, dy) = (wp[1] - s[0], wp[2] - s[1]);
                        let dist = dx.hypot(dy);
                        if dist > 0.05 {
                            s[2] = speed * dx / dist;
                            s[3] = speed * dy / dist;
                        } else {
                            s[2] = 0.0;
                            s[3] = 0.0;
                        }
                    }
                    None => {
                        s[2] = 0.0;
                        s[3] = 0.0;
                    }
                }
            }
        }
        s[0] += s[2] * dt;
        s[1] += s[3] * dt;

        if let Some([x0, y0, x1, y1]) = self.bounds {
            let [px, py, vx, vy] = s;
            reflect(px, vx, x0, x1);
            reflect(py, vy, y0, y1);
        }
    }

    /// True if the target exists at time `t`.
    pub fn is_active(&self, t: f64) -> bool {
        self.appear_at.map_or(true, |a| t >= a) && self.disappear_at.map_or(true, |d| t < d)
    }

    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }
}

fn reflect(p: &mut f64, v: &mut f64, lo: f64, hi: f64) {
    if *p < lo {
        *p = 2.0 * lo - *p;
        *v = v.abs();
    } else if *p > hi {
        *p = 2.0 * hi - *p;
        *v = -v.abs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walker(motion: MotionSpec) -> Target {
        Target {
            id: 0,
            state: [0.0, 0.0, 1.0, 0.0],
            motion,
            label: "person".into(),
            appearance: vec![1.0],
            bounds: None,
            appear_at: None,
            disappear_at: None,
        }
    }

    #[test]
    fn constant_velocity_moves_linearly() {
        let mut t = walker(MotionSpec::ConstantVelocity);
        for i in 0..10 {
            t.step(i as f64 * 0.1, 0.1);
        }
        assert!((t.state[0] - 1.0).abs() < 1e-9);
        assert_eq!(t.state[1], 0.0);
    }

    #[test]
    fn turn_preserves_speed() {
        let mut t = walker(MotionSpec::ConstantTurn { omega: 0.5 });
        for i in 0..50 {
            t.step(i as f64 * 0.1, 0.1);
        }
        assert!((t.state[2].hypot(t.state[3]) - 1.0).abs() < 1e-9);
        assert!(t.state[1] > 0.0);
    }

    #[test]
    fn bounds_reflect_position_and_velocity() {
        let mut t = walker(MotionSpec::ConstantVelocity);
        t.bounds = Some([0.0, -1.0, 0.5, 1.0]);
        for i in 0..7 {
            t.step(i as f64 * 0.1, 0.1);
        }
        assert!(t.state[0] <= 0.5);
        assert!(t.state[2] < 0.0);
    }

    #[test]
    fn waypoints_stop_at_goal() {
        let mut t = walker(MotionSpec::Waypoints {
            waypoints: vec![[100.0, 0.0, 2.0]],
            speed: 1.0,
        });
        for i in 0..100 {
            t.step(i as f64 * 0.1, 0.1);
        }
        assert!(t.state[0].abs() < 1e-9);
        assert!((t.state[1] - 2.0).abs() < 0.1);
    }

    #[test]
    fn activity_window() {
        let mut t = walker(MotionSpec::ConstantVelocity);
        t.appear_at = Some(1.0);
        t.disappear_at = Some(2.0);
        assert!(!t.is_active(0.5));
        assert!(t.is_active(1.0));
        assert!(!t.is_active(2.0));
    }
}
