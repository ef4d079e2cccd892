use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::{slot::Outputs, EffectId, SharedSlot};
use crate::{EngineEvent, Result};

/// Dedicated frame loop for an effect that asks for its own frame rate.
///
/// The thread checks its running flag once per frame; [`Worker::stop`] clears
/// the flag and joins, so the slot is free once it returns.
#[derive(Debug)]
pub(crate) struct Worker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(id: EffectId, slot: SharedSlot, outputs: Outputs, fps: u32) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let frame = Duration::from_secs(1) / fps.max(1);
        let handle = thread::Builder::new()
            .name(format!("effect-{id}"))
            .spawn(move || run(id, slot, outputs, flag, frame))?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// False once the loop has exited on its own (effect finished).
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("effect worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    id: EffectId,
    slot: SharedSlot,
    outputs: Outputs,
    running: Arc<AtomicBool>,
    frame: Duration,
) {
    tracing::debug!(effect = %id, ?frame, "worker started");
    let mut last = Instant::now();
    while running.load(Ordering::Acquire) {
        let started = Instant::now();
        let finished = {
            let mut slot = slot.lock();
            if !slot.instance.is_enabled() {
                break;
            }
            slot.instance.update((started - last).as_secs_f32());
            outputs.render_and_deliver(&id, &mut slot);
            let finished = slot.instance.is_finished();
            if finished {
                slot.instance.stop();
            }
            finished
        };
        last = started;

        if finished {
            outputs.publish(EngineEvent::Stopped(id.clone()));
            outputs.publish(EngineEvent::Finished(id.clone()));
            break;
        }
        if let Some(rest) = frame.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
    tracing::debug!(effect = %id, "worker exited");
}
