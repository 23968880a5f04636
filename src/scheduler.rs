use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, error, info, warn};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    capture::CaptureCapability,
    session::state::{now_ms, SessionState},
    store::ImageStore,
};

/// Fixed first-offset-then-interval timing policy for captures.
#[derive(Debug, Clone, Copy)]
pub struct CaptureCadence {
    pub first_offset: Duration,
    pub interval: Duration,
}

impl Default for CaptureCadence {
    fn default() -> Self {
        Self {
            first_offset: Duration::from_secs(30),
            interval: Duration::from_secs(30),
        }
    }
}

impl CaptureCadence {
    /// Delay until the next capture boundary when arming `elapsed` into a
    /// session. Re-arming mid-session lands on the original boundary instead
    /// of restarting the cadence from zero.
    pub fn first_delay(&self, elapsed: Duration) -> Duration {
        self.first_offset.saturating_sub(elapsed)
    }
}

/// Decides when captures happen during an active session and triggers the
/// platform capture capability. Capture and save run in their own task; the
/// scheduler never awaits them, it only refuses to stack a new capture on
/// top of one still in flight.
pub struct CaptureScheduler {
    cadence: CaptureCadence,
    capability: CaptureCapability,
    store: Arc<ImageStore>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    in_flight: Arc<AtomicBool>,
}

impl CaptureScheduler {
    pub fn new(cadence: CaptureCadence, capability: CaptureCapability, store: Arc<ImageStore>) -> Self {
        Self {
            cadence,
            capability,
            store,
            handle: None,
            cancel_token: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start (or restart) the tick loop for the given session. Safe to call
    /// while a previous loop is running; the old loop is cancelled first.
    pub async fn arm(&mut self, session: Arc<Mutex<SessionState>>) {
        self.cancel().await;

        // The in-flight flag deliberately survives a re-arm: a capture
        // started under the previous loop is never aborted, so it still
        // clears the flag itself, and resetting it here would let the new
        // loop stack a second capture on top of it.
        let elapsed = {
            let state = session.lock().await;
            if !state.is_active {
                debug!("arm requested while idle, nothing to schedule");
                return;
            }
            Duration::from_millis(state.elapsed_ms(now_ms()))
        };
        let delay = self.cadence.first_delay(elapsed);
        info!("capture cadence armed, first tick in {}ms", delay.as_millis());

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            delay,
            self.cadence.interval,
            session,
            self.capability.clone(),
            Arc::clone(&self.store),
            cancel_token.clone(),
            Arc::clone(&self.in_flight),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
    }

    /// Clear all pending ticks. Idempotent; a capture already executing is
    /// allowed to finish its save.
    pub async fn cancel(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!("capture tick loop failed to join: {err}");
                }
            }
        }
    }
}

async fn tick_loop(
    first_delay: Duration,
    interval: Duration,
    session: Arc<Mutex<SessionState>>,
    capability: CaptureCapability,
    store: Arc<ImageStore>,
    cancel_token: CancellationToken,
    in_flight: Arc<AtomicBool>,
) {
    tokio::select! {
        _ = cancel_token.cancelled() => return,
        _ = time::sleep(first_delay) => {}
    }

    // The first interval tick completes immediately, which lands the first
    // capture exactly on the offset boundary.
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("capture tick loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                // stop() may have fired between scheduling and this tick.
                if !session.lock().await.is_active {
                    debug!("session no longer active, capture loop exiting");
                    break;
                }
                trigger_capture(&capability, &store, &in_flight);
            }
        }
    }
}

fn trigger_capture(
    capability: &CaptureCapability,
    store: &Arc<ImageStore>,
    in_flight: &Arc<AtomicBool>,
) {
    let provider = match capability {
        CaptureCapability::Available(provider) => Arc::clone(provider),
        CaptureCapability::Unsupported { reason } => {
            warn!("frame capture unavailable: {reason}");
            return;
        }
    };

    if in_flight.swap(true, Ordering::SeqCst) {
        debug!("previous capture still in flight, skipping this tick");
        return;
    }

    let store = Arc::clone(store);
    let in_flight = Arc::clone(in_flight);
    tokio::spawn(async move {
        match provider.capture().await {
            Ok(frame) => match store.save(&frame.bytes, &frame.mime_type, frame.captured_at) {
                Ok(record) => debug!(
                    "capture persisted at {} ({} bytes, deduped={})",
                    record.path.display(),
                    record.byte_length,
                    record.deduped
                ),
                Err(err) => error!("failed to persist capture: {err}"),
            },
            Err(err) => error!("frame capture failed: {err}"),
        }
        in_flight.store(false, Ordering::SeqCst);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureProvider, CapturedFrame};
    use crate::error::CoreResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct CountingProvider {
        started: AtomicUsize,
        hold: bool,
    }

    #[async_trait]
    impl CaptureProvider for CountingProvider {
        async fn capture(&self) -> CoreResult<CapturedFrame> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if self.hold {
                // Never completes; models a capture stuck in flight.
                std::future::pending::<()>().await;
            }
            let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
            bytes.extend_from_slice(&self.started.load(Ordering::SeqCst).to_le_bytes());
            Ok(CapturedFrame {
                bytes,
                mime_type: "image/jpeg".to_string(),
                captured_at: chrono::Utc::now(),
            })
        }
    }

    fn fixture(hold: bool) -> (TempDir, Arc<CountingProvider>, CaptureScheduler) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ImageStore::new(dir.path()));
        let provider = Arc::new(CountingProvider {
            started: AtomicUsize::new(0),
            hold,
        });
        let scheduler = CaptureScheduler::new(
            CaptureCadence::default(),
            CaptureCapability::Available(provider.clone()),
            store,
        );
        (dir, provider, scheduler)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn catch_up_rule_targets_the_original_boundary() {
        let cadence = CaptureCadence::default();
        assert_eq!(
            cadence.first_delay(Duration::from_millis(10_000)),
            Duration::from_millis(20_000)
        );
        assert_eq!(cadence.first_delay(Duration::ZERO), Duration::from_secs(30));
        // Already past the boundary: fire immediately rather than drifting.
        assert_eq!(cadence.first_delay(Duration::from_secs(45)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_fire_on_the_thirty_second_cadence() {
        let (_dir, provider, mut scheduler) = fixture(false);
        let session = Arc::new(Mutex::new(SessionState::begin(600_000, now_ms())));

        scheduler.arm(session.clone()).await;
        settle().await;
        assert_eq!(provider.started.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);

        time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(provider.started.load(Ordering::SeqCst), 2);

        scheduler.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_observing_idle_session_exits_silently() {
        let (_dir, provider, mut scheduler) = fixture(false);
        let session = Arc::new(Mutex::new(SessionState::begin(600_000, now_ms())));

        scheduler.arm(session.clone()).await;
        session.lock().await.clear();

        time::advance(Duration::from_secs(90)).await;
        settle().await;
        assert_eq!(provider.started.load(Ordering::SeqCst), 0);

        scheduler.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_capture_suppresses_new_ticks() {
        let (_dir, provider, mut scheduler) = fixture(true);
        let session = Arc::new(Mutex::new(SessionState::begin(600_000, now_ms())));

        scheduler.arm(session.clone()).await;
        time::advance(Duration::from_secs(30)).await;
        settle().await;
        time::advance(Duration::from_secs(60)).await;
        settle().await;

        // Later ticks were no-ops while the first capture never finished.
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);

        scheduler.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_mid_session_keeps_the_in_flight_guard() {
        let (_dir, provider, mut scheduler) = fixture(true);
        let session = Arc::new(Mutex::new(SessionState::begin(600_000, now_ms())));

        scheduler.arm(session.clone()).await;
        settle().await;
        time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);

        // Re-enter the running session (widget reopened) while the first
        // capture is still stuck in flight.
        scheduler.arm(session.clone()).await;
        time::advance(Duration::from_secs(60)).await;
        settle().await;

        // Every later tick is a no-op until that capture finishes.
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);

        scheduler.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let (_dir, _provider, mut scheduler) = fixture(false);
        let session = Arc::new(Mutex::new(SessionState::begin(600_000, now_ms())));

        scheduler.arm(session).await;
        scheduler.cancel().await;
        scheduler.cancel().await;
    }
}
