//! Frame cadence for a running session.

use crate::input::InputSource;
use crate::session::{Session, TickOutcome};
use crate::store::RemoteStore;
use log::{info, trace};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopExit {
    GameOver { final_score: f32 },
    /// The shutdown future resolved first.
    Shutdown,
    /// The session was not running.
    Stopped,
}

/// Drives one simulation step per display refresh.
#[derive(Debug, Clone)]
pub struct GameLoop {
    frame: Duration,
}

impl GameLoop {
    pub fn new(refresh_hz: u32) -> Self {
        Self {
            frame: Duration::from_secs_f64(1.0 / refresh_hz.max(1) as f64),
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame
    }

    /// Ticks `session` until it ends or `shutdown` resolves, then tears the
    /// session down and waits for its last store calls.
    ///
    /// Late frames are skipped rather than replayed; the next step's delta
    /// time absorbs the gap.
    pub async fn run<S, I, F>(&self, session: &mut Session<S>, input: &mut I, shutdown: F) -> LoopExit
    where
        S: RemoteStore,
        I: InputSource,
        F: Future<Output = ()>,
    {
        if !session.is_running() {
            return LoopExit::Stopped;
        }

        tokio::pin!(shutdown);
        let mut ticker = interval(self.frame);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();
        let mut frames: u64 = 0;

        let exit = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested after {} frames", frames);
                    break LoopExit::Shutdown;
                }

                _ = ticker.tick() => {
                    let now = Instant::now();
                    let dt = session.config().delta_time(now.duration_since(last_frame));
                    last_frame = now;

                    let snapshot = match session.frame_view() {
                        Some(view) => input.sample(&view),
                        None => break LoopExit::Stopped,
                    };

                    frames += 1;
                    match session.tick(&snapshot, dt, now) {
                        TickOutcome::Running => trace!("Frame {} dt {:.2}", frames, dt),
                        TickOutcome::GameOver { final_score } => {
                            break LoopExit::GameOver { final_score };
                        }
                        TickOutcome::Stopped => break LoopExit::Stopped,
                    }
                }
            }
        };

        session.teardown();
        session.settle().await;
        exit
    }
}

impl Default for GameLoop {
    fn default() -> Self {
        Self::new(60)
    }
}
