use std::{collections::HashMap, sync::Arc};

use tokio::sync::broadcast;

use crate::{
    capture::{CaptureError, Display, DisplayId},
    frame::{Frame, FrameEncoder},
    geometry::{self, GeometryError, Rect},
    image::{sample, RawImage},
    models::Config,
};

use super::{ControllerEvent, SkipReason};

/// Sampling work for one strand during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct StrandPlan {
    pub display: Display,
    pub rects: Vec<Rect>,
}

pub type Captures = HashMap<DisplayId, Result<RawImage, CaptureError>>;

/// Core part of the controller
///
/// Owns the live configuration tables and display list, and turns display
/// snapshots into encoded frames.
pub struct Core {
    config: Arc<Config>,
    displays: Vec<Display>,
    resolved: Vec<Result<Display, GeometryError>>,
    encoder: FrameEncoder,
    skipped: Vec<Option<SkipReason>>,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl Core {
    pub fn new(
        config: Arc<Config>,
        displays: Vec<Display>,
        event_tx: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        let encoder = FrameEncoder::new(config.led_count(), &config.frame);

        let mut this = Self {
            skipped: vec![None; config.strands.len()],
            config,
            displays,
            resolved: Vec::new(),
            encoder,
            event_tx,
        };

        this.resolve();
        this
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn encoder(&self) -> &FrameEncoder {
        &self.encoder
    }

    fn resolve(&mut self) {
        self.resolved = self
            .config
            .displays
            .iter()
            .map(|assignment| geometry::resolve(assignment, &self.displays).cloned())
            .collect();

        for (idx, resolved) in self.resolved.iter().enumerate() {
            match resolved {
                Ok(resolved) => debug!(assignment = %idx, display = %resolved, "resolved display"),
                Err(error) => debug!(assignment = %idx, error = %error, "unresolved display"),
            }
        }
    }

    /// Replace the display list and resolve the assignments against it
    pub fn set_displays(&mut self, displays: Vec<Display>) {
        self.displays = displays;
        self.resolve();
    }

    /// Replace the configuration tables
    ///
    /// Last known LED colors survive if the LED address space and frame
    /// settings did not change. Skip status is kept per strand index, so a
    /// strand skipped before the update reports when it resumes.
    pub fn set_config(&mut self, config: Arc<Config>) {
        if config.led_count() != self.encoder.led_count() || config.frame != self.config.frame {
            self.encoder = FrameEncoder::new(config.led_count(), &config.frame);
        }

        self.skipped.resize(config.strands.len(), None);
        self.config = config;
        self.resolve();
    }

    /// Map every strand onto its resolved display
    pub fn plan(&self) -> Vec<Result<StrandPlan, GeometryError>> {
        self.config
            .strands
            .iter()
            .map(|strand| {
                let display = self.resolved[strand.display].clone()?;
                let rects = geometry::map_strand(strand, &display)?;
                Ok(StrandPlan { display, rects })
            })
            .collect()
    }

    /// Distinct displays a plan needs snapshots of
    pub fn targets(plans: &[Result<StrandPlan, GeometryError>]) -> Vec<Display> {
        let mut targets: Vec<Display> = Vec::new();

        for plan in plans.iter().flatten() {
            if !targets.iter().any(|display| display.id == plan.display.id) {
                targets.push(plan.display.clone());
            }
        }

        targets
    }

    /// Sample every planned strand and encode the resulting frame
    ///
    /// Strands which cannot be sampled keep their previous colors.
    pub fn assemble(
        &mut self,
        plans: &[Result<StrandPlan, GeometryError>],
        captures: &Captures,
    ) -> &[u8] {
        let mut frame = Frame::new();

        for (idx, plan) in plans.iter().enumerate() {
            let strand = &self.config.strands[idx];

            let skipped = match plan {
                Err(error) => Some(SkipReason::Geometry(error.clone())),
                Ok(plan) => match captures.get(&plan.display.id) {
                    Some(Ok(image)) => {
                        frame.push_strand(
                            strand.id_min as usize,
                            plan.rects.iter().map(|rect| sample(image, rect)),
                        );
                        None
                    }
                    Some(Err(error)) => Some(SkipReason::Capture(error.to_string())),
                    None => Some(SkipReason::Capture(
                        CaptureError::CaptureUnavailable(plan.display.id).to_string(),
                    )),
                },
            };

            self.update_status(idx, skipped);
        }

        self.encoder.encode(&frame)
    }

    fn update_status(&mut self, strand: usize, skipped: Option<SkipReason>) {
        if self.skipped[strand] == skipped {
            return;
        }

        match &skipped {
            Some(reason) => {
                warn!(strand = %strand, reason = %reason, "skipping strand");
                self.event_tx
                    .send(ControllerEvent::StrandSkipped {
                        strand,
                        reason: reason.clone(),
                    })
                    .ok();
            }
            None => {
                info!(strand = %strand, "strand resumed");
                self.event_tx
                    .send(ControllerEvent::StrandResumed { strand })
                    .ok();
            }
        }

        self.skipped[strand] = skipped;
    }
}
