pub mod completion;
pub mod drift;
pub mod prd;
pub mod review;
pub mod state;
pub mod store;
pub mod workflow;

pub use completion::{CompletionChecker, CompletionStatus};
pub use drift::{DriftClassification, DriftDetector, DriftReport};
pub use prd::{Prd, PrdFrontmatter};
pub use review::{ReviewResult, ReviewSession, Verdict};
pub use state::FeatureStatus;
pub use store::PrdStore;
pub use workflow::{CommitSpecsOutcome, Workflow, WorkflowConfig};
