//! Fill scheduling
//!
//! `FillPump` runs engine ticks on a dedicated thread at a fixed period, the
//! way a firmware timer task would. `play_blocking` is the synchronous
//! variant for callers that want to wait for one stream to finish.

use crate::error::Result;
use crate::playback::engine::AudioEngine;
use crate::storage::StorageKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Background thread calling `AudioEngine::tick` every `period`
///
/// Stops when `shutdown` is called or the pump is dropped.
pub struct FillPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FillPump {
    pub fn spawn(engine: Arc<Mutex<AudioEngine>>, period: Duration) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("chirp-fill".to_string())
            .spawn(move || {
                debug!("Fill pump started ({:?} period)", period);
                while !thread_stop.load(Ordering::Acquire) {
                    match engine.lock() {
                        Ok(mut engine) => {
                            engine.tick();
                        }
                        Err(_) => {
                            error!("Engine lock poisoned, fill pump exiting");
                            break;
                        }
                    }
                    thread::sleep(period);
                }
                debug!("Fill pump stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it
    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Fill pump thread panicked");
            }
        }
    }
}

impl Drop for FillPump {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

impl AudioEngine {
    /// Start `path` on `slot` and tick until the slot is inactive again
    ///
    /// `pace` runs after every tick and stands in for the passage of time:
    /// it usually sleeps or drives a mixer. Returning `false` stops the slot
    /// and ends playback early. Start errors are returned before any tick.
    pub fn play_blocking<F>(&mut self, slot: usize, path: &str, storage: StorageKind, mut pace: F) -> Result<()>
    where
        F: FnMut(&AudioEngine) -> bool,
    {
        self.start_stream(slot, path, storage)?;

        while self.is_slot_active(slot) {
            self.tick();
            if !self.is_slot_active(slot) {
                break;
            }
            if !pace(self) {
                debug!("Slot {} playback cut short", slot);
                self.stop_stream(slot)?;
                break;
            }
        }
        Ok(())
    }
}
