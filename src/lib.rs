//! Core of the Attend focus-tracking agent: session state machine, capture
//! cadence, content-addressed image storage and the classification feedback
//! loop. The platform shell (windows, IPC, real screen capture) plugs in
//! through the `CaptureProvider` and `FeedbackSurface` seams.

pub mod capture;
pub mod classify;
pub mod config;
pub mod error;
pub mod reaction;
pub mod scheduler;
pub mod session;
pub mod store;

use std::{path::Path, sync::Arc};

use log::warn;

pub use capture::{CaptureCapability, CaptureProvider, CapturedFrame};
pub use classify::{
    AnalysisOutcome, ClassificationClient, ClassificationVerdict, Classifier, FocusStatus,
};
pub use config::AppConfig;
pub use error::{CoreError, CoreResult};
pub use reaction::{FeedbackSurface, PanelView, ReactionController};
pub use scheduler::{CaptureCadence, CaptureScheduler};
pub use session::{SessionController, SessionState};
pub use store::{CaptureRecord, ImageStore};

/// Everything the shell needs, wired once per process. No component is
/// reachable as an ambient global; handles are cloned out of here.
pub struct AttendCore {
    pub session: SessionController,
    pub store: Arc<ImageStore>,
    pub classifier: Arc<ClassificationClient>,
    pub reaction: ReactionController,
}

impl AttendCore {
    pub fn new(
        config: AppConfig,
        data_dir: &Path,
        capability: CaptureCapability,
        surface: Arc<dyn FeedbackSurface>,
    ) -> Self {
        if let CaptureCapability::Unsupported { reason } = &capability {
            warn!("frame capture unsupported on this platform: {reason}");
        }

        let store = Arc::new(ImageStore::new(data_dir));
        let classifier = Arc::new(ClassificationClient::new(config, Arc::clone(&store)));
        let reaction = ReactionController::new(surface);
        let scheduler =
            CaptureScheduler::new(CaptureCadence::default(), capability, Arc::clone(&store));
        let session = SessionController::new(
            scheduler,
            Arc::clone(&classifier) as Arc<dyn Classifier>,
            reaction.clone(),
        );

        Self {
            session,
            store,
            classifier,
            reaction,
        }
    }
}

/// Initialize logging for the hosting process (reads RUST_LOG env var).
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
