//! Journey definitions and the journey tracker.

mod defaults;
mod objects;
mod tracker;

pub use defaults::default_definitions;
pub use objects::{
    ConflictResolution,
    EventMatcher,
    ExpectedStep,
    JourneyConfig,
    JourneyConfigError,
    JourneyDefinition,
    JourneyThresholds,
    NewJourneyDefinition,
};
pub use tracker::{
    ConflictSeverity,
    JourneyTracker,
    TrackerSummary,
    ABANDONED_AFTER_DAYS,
    DEFAULT_STEP_ESTIMATE_MINUTES,
    DEFAULT_STUCK_THRESHOLD_MINUTES,
};
