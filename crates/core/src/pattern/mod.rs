//! Diagnostic light patterns.
//!
//! [`PatternTester`] is a small single-threaded driver for checking a
//! physical layout: light one cell, sweep a layer, or run the distance and
//! wave math continuously. It writes through the same [`DeviceBus`] as the
//! engine and only ever resets what it lit itself.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    DeviceBus, DevicePlacement, DeviceReference, DistanceFalloff, EffectId, EffectInstance,
    EffectLayout, EffectSettings, GridPosition, PatternConfig, Result, RgbColor, SharedGrid,
    SpatialEffect, SpatialError, Wave,
};

/// Longest single sleep while waiting between layer positions.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Cooperative cancellation flag shared between threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleeps for `duration` unless cancelled first. Returns false if
    /// cancelled.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Distance,
    Wave,
}

impl PatternKind {
    fn label(&self) -> &'static str {
        match self {
            PatternKind::Distance => "distance pattern",
            PatternKind::Wave => "wave pattern",
        }
    }
}

struct ContinuousTest {
    kind: PatternKind,
    instance: EffectInstance,
    placements: Vec<DevicePlacement>,
    started: Instant,
    last: Instant,
}

pub struct PatternTester {
    grid: SharedGrid,
    devices: DeviceBus,
    config: PatternConfig,
    continuous: Option<ContinuousTest>,
    touched: BTreeSet<(GridPosition, DeviceReference)>,
}

impl PatternTester {
    pub fn new(grid: SharedGrid, devices: DeviceBus, config: PatternConfig) -> Self {
        Self {
            grid,
            devices,
            config,
            continuous: None,
            touched: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    pub fn active_pattern(&self) -> Option<PatternKind> {
        self.continuous.as_ref().map(|test| test.kind)
    }

    /// Number of assignments currently lit by a test.
    pub fn touched_count(&self) -> usize {
        self.touched.len()
    }

    /// Lights every assignment at `position` with the test color.
    pub fn test_position(&mut self, position: GridPosition) -> Result<usize> {
        let placements = self.placements_at(position)?;
        self.light(&placements)
    }

    /// Lights the assigned positions of layer `z` one after another, `delay`
    /// apart, until done or `cancel` trips. Returns how many positions were
    /// lit.
    pub fn test_layer(&mut self, z: u32, delay: Duration, cancel: &CancelToken) -> Result<usize> {
        let positions: Vec<GridPosition> = {
            let grid = self.grid.read();
            let dimensions = grid.dimensions();
            if z >= dimensions.depth {
                return Err(SpatialError::OutOfBounds {
                    position: GridPosition::new(0, 0, z as i32),
                    dimensions,
                });
            }
            grid.assigned_positions()
                .into_iter()
                .filter(|p| p.z == z as i32)
                .collect()
        };

        let mut lit = 0;
        for (i, position) in positions.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            self.test_position(*position)?;
            lit += 1;
            if i + 1 < positions.len() && !cancel.sleep(delay) {
                break;
            }
        }
        if lit < positions.len() {
            tracing::debug!(layer = z, lit, total = positions.len(), "layer sweep cancelled");
        }
        Ok(lit)
    }

    /// Lights every assigned position at once.
    pub fn test_all_positions(&mut self) -> Result<usize> {
        let placements = self.grid.read().placements();
        self.light(&placements)
    }

    pub fn start_distance_pattern(&mut self, now: Instant) -> Result<usize> {
        self.start_continuous(PatternKind::Distance, now)
    }

    pub fn start_wave_pattern(&mut self, now: Instant) -> Result<usize> {
        self.start_continuous(PatternKind::Wave, now)
    }

    /// Re-evaluates the running pattern if at least one interval has passed
    /// since the last evaluation. Returns the number of device writes.
    pub fn poll(&mut self, now: Instant) -> Result<usize> {
        let interval = Duration::from_millis(self.config.interval_ms);
        let frame = match self.continuous.as_mut() {
            Some(test) if now.saturating_duration_since(test.last) >= interval => {
                test.last = now;
                evaluate(test, now)
            }
            _ => return Ok(0),
        };
        self.deliver(frame)
    }

    /// Ends whatever is running and turns off everything it lit. Returns how
    /// many assignments were reset.
    pub fn stop(&mut self) -> Result<usize> {
        if let Some(test) = self.continuous.take() {
            tracing::debug!(pattern = test.kind.label(), "pattern stopped");
        }
        let frame: Vec<_> = std::mem::take(&mut self.touched)
            .into_iter()
            .map(|(position, reference)| (DevicePlacement { reference, position }, RgbColor::BLACK))
            .collect();
        let reset = frame.len();
        self.deliver(frame)?;
        self.touched.clear();
        Ok(reset)
    }

    fn start_continuous(&mut self, kind: PatternKind, now: Instant) -> Result<usize> {
        self.stop()?;
        let (reference, placements) = {
            let grid = self.grid.read();
            (grid.user_position(), grid.placements())
        };
        if reference.is_none() {
            tracing::warn!(pattern = kind.label(), "no reference point set");
            return Err(SpatialError::MissingReferencePoint(EffectId::from(kind.label())));
        }

        let effect: Box<dyn SpatialEffect> = match kind {
            PatternKind::Distance => Box::new(DistanceFalloff::new()),
            PatternKind::Wave => Box::new(Wave::new(self.config.wave)),
        };
        let settings = EffectSettings::with_color(self.config.test_color);
        let mut instance = EffectInstance::with_settings(effect, settings);
        let mut positions: Vec<_> = placements.iter().map(|p| p.position).collect();
        positions.dedup();
        instance.prepare(EffectLayout::new(reference, positions));
        instance.start();

        let test = ContinuousTest {
            kind,
            instance,
            placements,
            started: now,
            last: now,
        };
        let frame = evaluate(&test, now);
        self.continuous = Some(test);
        tracing::debug!(pattern = kind.label(), "pattern started");
        self.deliver(frame)
    }

    fn placements_at(&self, position: GridPosition) -> Result<Vec<DevicePlacement>> {
        let grid = self.grid.read();
        if !grid.contains(position) {
            return Err(SpatialError::OutOfBounds {
                position,
                dimensions: grid.dimensions(),
            });
        }
        Ok(grid
            .assignments(position)
            .into_iter()
            .map(|a| DevicePlacement {
                reference: a.reference,
                position,
            })
            .collect())
    }

    fn light(&mut self, placements: &[DevicePlacement]) -> Result<usize> {
        let color = self.config.test_color;
        self.deliver(placements.iter().map(|p| (*p, color)).collect())
    }

    fn deliver(&mut self, frame: Vec<(DevicePlacement, RgbColor)>) -> Result<usize> {
        if frame.is_empty() {
            return Ok(0);
        }
        let writes: Vec<_> = frame.iter().map(|(p, color)| (p.reference, *color)).collect();
        let report = self.devices.apply(&writes)?;

        let mut grid = self.grid.write();
        for (placement, color) in &frame {
            self.touched.insert((placement.position, placement.reference));
            if let Some(index) = grid.find_assignment(placement.position, &placement.reference) {
                grid.update_assignment_color(placement.position, index, *color);
            }
        }
        Ok(report.written)
    }
}

fn evaluate(test: &ContinuousTest, now: Instant) -> Vec<(DevicePlacement, RgbColor)> {
    let time = now.saturating_duration_since(test.started).as_secs_f32();
    test.placements
        .iter()
        .map(|p| {
            let color = test.instance.color_at(p.position, time).unwrap_or(RgbColor::BLACK);
            (*p, color)
        })
        .collect()
}
