use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::classify::{ClassificationVerdict, FocusStatus};

/// What the feedback surface should render when revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelView {
    /// Session setup form (manual "new session" flow).
    Setup,
    /// Analysis view, optionally seeded with a verdict to display.
    Analysis(Option<ClassificationVerdict>),
}

/// Seam to the window that hosts the feedback UI. The shell implements
/// this; the core only decides visibility transitions.
pub trait FeedbackSurface: Send + Sync {
    fn reveal(&self, view: PanelView);
    fn hide(&self);
    /// False until the surface has finished loading and can accept a view.
    fn is_ready(&self) -> bool;
}

#[derive(Default)]
struct ReactionState {
    visible: bool,
    pending_setup: bool,
}

/// Maps classification verdicts onto feedback-surface visibility. Reveals
/// and hides are idempotent; verdicts never change visibility when the
/// surface is already in the target state.
#[derive(Clone)]
pub struct ReactionController {
    surface: Arc<dyn FeedbackSurface>,
    state: Arc<Mutex<ReactionState>>,
}

impl ReactionController {
    pub fn new(surface: Arc<dyn FeedbackSurface>) -> Self {
        Self {
            surface,
            state: Arc::new(Mutex::new(ReactionState::default())),
        }
    }

    /// Drifted verdicts reveal the surface with the verdict attached;
    /// on-task verdicts hide it.
    pub fn apply(&self, verdict: &ClassificationVerdict) {
        match verdict.status {
            FocusStatus::Drifted => {
                info!("verdict: drifted, revealing feedback surface");
                self.reveal(PanelView::Analysis(Some(verdict.clone())));
            }
            FocusStatus::OnTask => {
                debug!("verdict: on task");
                self.hide();
            }
        }
    }

    /// Reveal the surface with a final verdict regardless of its status,
    /// used when a session's timer expires so the user always sees the
    /// closing analysis. Unlike loop-driven reveals this pushes the view
    /// even when the surface is already visible; otherwise a mid-session
    /// drift reveal would leave stale analysis on screen at session end.
    pub fn present_verdict(&self, verdict: &ClassificationVerdict) {
        self.state.lock().unwrap().visible = true;
        self.surface.reveal(PanelView::Analysis(Some(verdict.clone())));
    }

    /// Explicit reveal outside the classification loop, e.g. the widget's
    /// "new session" button. When the surface has not finished loading yet
    /// the setup intent is latched and replayed by `notify_surface_ready`.
    pub fn request_reveal(&self, setup: bool) {
        if setup && !self.surface.is_ready() {
            debug!("surface not ready, latching setup request");
            self.state.lock().unwrap().pending_setup = true;
            return;
        }
        let view = if setup {
            PanelView::Setup
        } else {
            PanelView::Analysis(None)
        };
        self.reveal(view);
    }

    /// Called by the shell once the surface has loaded; replays a latched
    /// setup request exactly once.
    pub fn notify_surface_ready(&self) {
        let pending = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.pending_setup)
        };
        if pending {
            self.reveal(PanelView::Setup);
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().unwrap().visible
    }

    fn reveal(&self, view: PanelView) {
        let mut state = self.state.lock().unwrap();
        if state.visible {
            debug!("surface already visible, reveal is a no-op");
            return;
        }
        state.visible = true;
        drop(state);
        self.surface.reveal(view);
    }

    fn hide(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.visible {
            return;
        }
        state.visible = false;
        drop(state);
        self.surface.hide();
    }
}
