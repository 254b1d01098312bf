//! Outward interface for per-cycle results.
//!
//! Transport is the collaborator's concern; [`JsonLinesPublisher`] is a plain
//! file/stream sink writing one JSON document per cycle.

use crate::orchestrator::CycleOutput;
use std::io::{self, Write};

/// Consumer of completed cycles.
pub trait ResultPublisher {
    fn publish(&mut self, output: &CycleOutput) -> io::Result<()>;
}

/// Writes each cycle as one line of JSON.
pub struct JsonLinesPublisher<W: Write> {
    writer: W,
    published: u64,
}

impl<W: Write> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            published: 0,
        }
    }

    /// Cycles written so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultPublisher for JsonLinesPublisher<W> {
    fn publish(&mut self, output: &CycleOutput) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, output)?;
        self.writer.write_all(b"\n")?;
        self.published += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metrics::CycleStats,
        orchestrator::CameraResult,
        types::{BBox, CameraId, GlobalId, GlobalRef, LocalTrackId},
    };

    #[test]
    fn one_line_per_cycle() {
        let output = CycleOutput {
            cycle: 4,
            timestamp: 0.4,
            cameras: vec![CameraResult {
                camera_id: CameraId(0),
                timestamp: 0.4,
                bboxes: vec![BBox::new(1.0, 2.0, 3.0, 4.0)],
                labels: vec!["person".into()],
                global_ids: vec![GlobalRef::Global(GlobalId(9))],
                local_ids: vec![LocalTrackId(2)],
            }],
            stats: CycleStats::default(),
        };
        let mut publisher = JsonLinesPublisher::new(Vec::new());
        publisher.publish(&output).unwrap();
        publisher.publish(&output).unwrap();
        assert_eq!(publisher.published(), 2);

        let text = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: CycleOutput = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(back.cycle, 4);
        assert_eq!(back.cameras[0].global_ids[0], GlobalRef::Global(GlobalId(9)));
    }
}
