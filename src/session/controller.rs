use std::sync::Arc;

use log::{error, info};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Duration},
};

use crate::{
    classify::Classifier,
    error::{CoreError, CoreResult},
    reaction::ReactionController,
    scheduler::CaptureScheduler,
    session::state::{now_ms, SessionState},
};

/// How many captures the end-of-session analysis may consider.
pub const END_OF_SESSION_ANALYSIS_LIMIT: usize = 10;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Owns the idle/active session state machine, the end-of-session timer and
/// the capture scheduler. Constructed once per process and cloned into
/// whoever needs a handle; there is exactly one SessionState behind it.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<SessionState>>,
    scheduler: Arc<Mutex<CaptureScheduler>>,
    classifier: Arc<dyn Classifier>,
    reaction: ReactionController,
    end_timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    events: broadcast::Sender<SessionState>,
}

impl SessionController {
    pub fn new(
        scheduler: CaptureScheduler,
        classifier: Arc<dyn Classifier>,
        reaction: ReactionController,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SessionState::default())),
            scheduler: Arc::new(Mutex::new(scheduler)),
            classifier,
            reaction,
            end_timer: Arc::new(Mutex::new(None)),
            events,
        }
    }

    /// Observers receive every state transition, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.events.subscribe()
    }

    /// Current snapshot, no side effects.
    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Begin a timed session. Fails with `AlreadyActive` while one is
    /// running; otherwise arms the capture cadence and the end-of-session
    /// timer and returns immediately.
    pub async fn start(&self, length_ms: u64) -> CoreResult<SessionState> {
        let snapshot = {
            let mut state = self.state.lock().await;
            if state.is_active {
                return Err(CoreError::AlreadyActive);
            }
            *state = SessionState::begin(length_ms, now_ms());
            *state
        };

        info!(
            "session started: {}ms, ends at {}",
            snapshot.length_ms, snapshot.end_time
        );
        self.broadcast(snapshot);
        self.scheduler.lock().await.arm(Arc::clone(&self.state)).await;
        self.arm_end_timer(length_ms).await;

        Ok(snapshot)
    }

    /// End the session. Idempotent; cancels the end timer and all pending
    /// capture ticks, zeroes the state and broadcasts it.
    pub async fn stop(&self) {
        if let Some(handle) = self.end_timer.lock().await.take() {
            handle.abort();
        }
        self.stop_core().await;
    }

    async fn arm_end_timer(&self, length_ms: u64) {
        let mut guard = self.end_timer.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        let controller = self.clone();
        *guard = Some(tokio::spawn(async move {
            time::sleep(Duration::from_millis(length_ms)).await;
            controller.finish().await;
        }));
    }

    /// Natural end of the session: stop, then surface one final verdict.
    async fn finish(&self) {
        // Running on the end-timer task itself, so detach the handle
        // instead of aborting it.
        self.end_timer.lock().await.take();

        info!("session length elapsed, ending session");
        self.stop_core().await;

        match self.classifier.analyze(END_OF_SESSION_ANALYSIS_LIMIT).await {
            Ok(outcome) => {
                info!(
                    "end-of-session verdict over {} image(s): {:?}",
                    outcome.images_analyzed, outcome.verdict.status
                );
                self.reaction.present_verdict(&outcome.verdict);
            }
            Err(err) => error!("end-of-session classification failed: {err}"),
        }
    }

    async fn stop_core(&self) {
        self.scheduler.lock().await.cancel().await;
        let snapshot = {
            let mut state = self.state.lock().await;
            state.clear();
            *state
        };
        self.broadcast(snapshot);
    }

    fn broadcast(&self, snapshot: SessionState) {
        // No subscribers is fine; the widget may not be open.
        let _ = self.events.send(snapshot);
    }
}
