pub mod back_guard;
pub mod elapsed;
pub mod progress_stream;
pub mod progress_tracker;
pub mod stage;

pub use back_guard::{on_back_attempt, BackDecision, NavigationHistory, RouteHistory};
pub use elapsed::{format_elapsed, ElapsedTicker};
pub use progress_stream::{ProgressSession, ProgressStreamClient, StreamOutcome};
pub use progress_tracker::{Applied, AutoComplete, ProgressTracker};
pub use stage::{Phase, Stage, StageEvent};
