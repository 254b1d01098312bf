//! Camera detection simulator.
//!
//! Generates one synchronized `FrameBatch` per cycle with:
//! - Uniform pixel noise on box position and size
//! - Miss probability (1 - P_D)
//! - Poisson clutter (false detections with random appearance)
//! - Missing embeddings, dropped frames and stale frames

use crate::target::Target;
use nalgebra::DVector;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracker_core::types::{BBox, CameraFrame, CameraId, Detection, FrameBatch};

/// Maps a rectangle of the ground plane to image pixels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraView {
    /// Ground-plane corner mapped to pixel (0, 0), metres
    pub origin: [f64; 2],
    /// Ground-plane size covered, metres
    pub extent: [f64; 2],
    /// Pixels per metre
    pub scale: f64,
}

impl CameraView {
    /// Image box of a target standing at (x, y), or `None` if out of view.
    pub fn project(&self, x: f64, y: f64, size: [f64; 2]) -> Option<BBox> {
        let (u, v) = (x - self.origin[0], y - self.origin[1]);
        if !(0.0..=self.extent[0]).contains(&u) || !(0.0..=self.extent[1]).contains(&v) {
            return None;
        }
        Some(BBox::from_center(
            u * self.scale,
            v * self.scale,
            size[0] * self.scale,
            size[1] * self.scale,
        ))
    }

    pub fn image_size(&self) -> (f64, f64) {
        (self.extent[0] * self.scale, self.extent[1] * self.scale)
    }
}

/// Detector and transport imperfections of one camera.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraParams {
    pub p_detection: f64,
    /// Mean false detections per frame
    pub lambda_clutter: f64,
    /// Half-width of uniform box noise, pixels
    pub pixel_noise: f64,
    /// Half-width of uniform per-component embedding noise
    pub embedding_noise: f64,
    /// Probability a detection arrives without an embedding
    pub p_missing_embedding: f64,
    /// Probability the whole frame is lost
    pub p_frame_drop: f64,
    /// Probability the frame arrives late
    pub p_frame_stale: f64,
    /// Timestamp lag of a late frame, seconds
    pub stale_lag: f64,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            p_detection: 0.95,
            lambda_clutter: 0.2,
            pixel_noise: 1.0,
            embedding_noise: 0.02,
            p_missing_embedding: 0.0,
            p_frame_drop: 0.0,
            p_frame_stale: 0.0,
            stale_lag: 1.0,
        }
    }
}

/// One configured camera in the simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimCamera {
    pub id: CameraId,
    pub view: CameraView,
    pub params: CameraParams,
}

/// Visible target box in one camera, for scoring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TruthBox {
    pub camera_id: CameraId,
    pub target_id: u64,
    pub bbox: BBox,
}

/// Ground truth at one cycle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroundTruthFrame {
    pub cycle: u64,
    pub time: f64,
    pub boxes: Vec<TruthBox>,
}

impl GroundTruthFrame {
    /// Target whose true box best overlaps `bbox` in `camera`, if any reaches `min_iou`.
    pub fn associate(&self, camera: CameraId, bbox: &BBox, min_iou: f64) -> Option<u64> {
        self.boxes
            .iter()
            .filter(|b| b.camera_id == camera)
            .map(|b| (b.bbox.iou(bbox), b.target_id))
            .filter(|(iou, _)| *iou >= min_iou)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id)
    }
}

/// Generates camera frame batches from a set of targets.
pub struct CameraSimulator {
    pub cameras: Vec<SimCamera>,
    /// Physical box size [w, h] in metres
    pub target_size: [f64; 2],
    rng: ChaCha8Rng,
}

impl CameraSimulator {
    pub fn new(cameras: Vec<SimCamera>, target_size: [f64; 2], seed: u64) -> Self {
        Self {
            cameras,
            target_size,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// One synchronized batch plus the ground truth it was drawn from.
    pub fn generate_batch(
        &mut self,
        targets: &[Target],
        cycle: u64,
        time: f64,
    ) -> (FrameBatch, GroundTruthFrame) {
        let mut frames = Vec::with_capacity(self.cameras.len());
        let mut truth = GroundTruthFrame {
            cycle,
            time,
            boxes: Vec::new(),
        };
        let dim = targets.first().map_or(0, |t| t.appearance.len());

        for cam in &self.cameras {
            let p = &cam.params;
            let mut detections = Vec::new();

            for target in targets.iter().filter(|t| t.is_active(time)) {
                let (x, y) = target.position();
                let Some(bbox) = cam.view.project(x, y, self.target_size) else {
                    continue;
                };
                truth.boxes.push(TruthBox {
                    camera_id: cam.id,
                    target_id: target.id,
                    bbox,
                });

                if self.rng.gen::<f64>() > p.p_detection {
                    continue;
                }
                let embedding = if self.rng.gen::<f64>() < p.p_missing_embedding {
                    None
                } else {
                    Some(noisy_embedding(&mut self.rng, &target.appearance, p.embedding_noise))
                };
                detections.push(Detection {
                    camera_id: cam.id,
                    bbox: jitter(&mut self.rng, &bbox, p.pixel_noise),
                    label: target.label.clone(),
                    confidence: 0.6 + 0.4 * self.rng.gen::<f64>(),
                    embedding,
                });
            }

            // Clutter: Poisson by multiplying uniforms until below e^{-lambda}
            let n_clutter = if p.lambda_clutter <= 0.0 {
                0
            } else {
                let threshold = (-p.lambda_clutter).exp();
                let mut n = 0usize;
                let mut prod = self.rng.gen::<f64>();
                while prod > threshold && n < 50 {
                    prod *= self.rng.gen::<f64>();
                    n += 1;
                }
                n
            };
            let (img_w, img_h) = cam.view.image_size();
            for _ in 0..n_clutter {
                let w = self.target_size[0] * cam.view.scale;
                let h = self.target_size[1] * cam.view.scale;
                let cx = self.rng.gen::<f64>() * img_w;
                let cy = self.rng.gen::<f64>() * img_h;
                let random: Vec<f64> = (0..dim.max(1)).map(|_| self.rng.gen::<f64>() - 0.5).collect();
                detections.push(Detection {
                    camera_id: cam.id,
                    bbox: BBox::from_center(cx, cy, w, h),
                    label: "person".into(),
                    confidence: 0.3 + 0.5 * self.rng.gen::<f64>(),
                    embedding: Some(normalized(random)),
                });
            }

            // Transport faults are drawn last so the detection stream stays
            // identical with or without them.
            if self.rng.gen::<f64>() < p.p_frame_drop {
                continue;
            }
            let timestamp = if self.rng.gen::<f64>() < p.p_frame_stale {
                time - p.stale_lag
            } else {
                time
            };
            frames.push(CameraFrame {
                camera_id: cam.id,
                timestamp,
                detections,
            });
        }

        (
            FrameBatch {
                cycle,
                timestamp: time,
                frames,
            },
            truth,
        )
    }
}

/// Random unit vector of dimension `dim`.
pub fn random_appearance(rng: &mut impl Rng, dim: usize) -> Vec<f64> {
    let v: Vec<f64> = (0..dim).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect();
    normalized(v).iter().copied().collect()
}

fn normalized(v: Vec<f64>) -> DVector<f64> {
    let mut d = DVector::from_vec(v);
    let n = d.norm();
    if n > 0.0 {
        d /= n;
    }
    d
}

fn noisy_embedding(rng: &mut ChaCha8Rng, appearance: &[f64], noise: f64) -> DVector<f64> {
    let v = appearance
        .iter()
        .map(|a| a + rng.gen::<f64>() * noise * 2.0 - noise)
        .collect();
    normalized(v)
}

fn jitter(rng: &mut ChaCha8Rng, b: &BBox, noise: f64) -> BBox {
    let mut n = || rng.gen::<f64>() * noise * 2.0 - noise;
    let (cx, cy) = b.center();
    BBox::from_center(cx + n(), cy + n(), (b.w + n()).max(1.0), (b.h + n()).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MotionSpec;

    fn camera(id: u32, params: CameraParams) -> SimCamera {
        SimCamera {
            id: CameraId(id),
            view: CameraView {
                origin: [0.0, 0.0],
                extent: [20.0, 10.0],
                scale: 20.0,
            },
            params,
        }
    }

    fn still_target(id: u64, x: f64) -> Target {
        Target {
            id,
            state: [x, 5.0, 0.0, 0.0],
            motion: MotionSpec::ConstantVelocity,
            label: "person".into(),
            appearance: vec![1.0, 0.0, 0.0, 0.0],
            bounds: None,
            appear_at: None,
            disappear_at: None,
        }
    }

    fn perfect() -> CameraParams {
        CameraParams {
            p_detection: 1.0,
            lambda_clutter: 0.0,
            pixel_noise: 0.0,
            embedding_noise: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn projection_maps_scale_and_rejects_out_of_view() {
        let view = CameraView {
            origin: [10.0, 0.0],
            extent: [10.0, 10.0],
            scale: 10.0,
        };
        let b = view.project(12.0, 3.0, [0.5, 1.5]).unwrap();
        assert_eq!(b.center(), (20.0, 30.0));
        assert_eq!((b.w, b.h), (5.0, 15.0));
        assert!(view.project(9.0, 3.0, [0.5, 1.5]).is_none());
    }

    #[test]
    fn perfect_camera_sees_every_target() {
        let mut sim = CameraSimulator::new(vec![camera(0, perfect())], [0.6, 1.7], 1);
        let targets = vec![still_target(0, 5.0), still_target(1, 15.0), still_target(2, 30.0)];
        let (batch, truth) = sim.generate_batch(&targets, 0, 0.0);
        assert_eq!(batch.frames.len(), 1);
        assert_eq!(batch.frames[0].detections.len(), 2, "target 2 is out of view");
        assert_eq!(truth.boxes.len(), 2);
        let d = &batch.frames[0].detections[0];
        assert_eq!(truth.associate(CameraId(0), &d.bbox, 0.5), Some(0));
        assert_eq!(d.embedding.as_ref().unwrap()[0], 1.0);
    }

    #[test]
    fn dropped_and_stale_frames() {
        let dropped = CameraParams {
            p_frame_drop: 1.0,
            ..perfect()
        };
        let stale = CameraParams {
            p_frame_stale: 1.0,
            stale_lag: 2.0,
            ..perfect()
        };
        let mut sim = CameraSimulator::new(vec![camera(0, dropped), camera(1, stale)], [0.6, 1.7], 2);
        let (batch, _) = sim.generate_batch(&[still_target(0, 5.0)], 3, 10.0);
        assert_eq!(batch.frames.len(), 1);
        assert_eq!(batch.frames[0].camera_id, CameraId(1));
        assert_eq!(batch.frames[0].timestamp, 8.0);
    }

    #[test]
    fn missing_embeddings_drawn() {
        let blind = CameraParams {
            p_missing_embedding: 1.0,
            ..perfect()
        };
        let mut sim = CameraSimulator::new(vec![camera(0, blind)], [0.6, 1.7], 3);
        let (batch, _) = sim.generate_batch(&[still_target(0, 5.0)], 0, 0.0);
        assert!(batch.frames[0].detections[0].embedding.is_none());
    }

    #[test]
    fn same_seed_same_batches() {
        let params = CameraParams {
            lambda_clutter: 2.0,
            pixel_noise: 2.0,
            embedding_noise: 0.1,
            ..Default::default()
        };
        let targets = vec![still_target(0, 5.0), still_target(1, 12.0)];
        let run = || {
            let mut sim = CameraSimulator::new(vec![camera(0, params.clone())], [0.6, 1.7], 42);
            (0..5)
                .map(|c| sim.generate_batch(&targets, c, c as f64 * 0.1).0)
                .map(|b| serde_json::to_string(&b).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn random_appearance_is_unit_norm() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let a = random_appearance(&mut rng, 16);
        let norm: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
    }
}
