mod ensemble;
mod feedback;
mod matcher;
mod router;

pub use ensemble::{aggregate, EnsembleCoordinator, EnsembleDecision, MethodOutcome, VotingRules};
pub use feedback::FeedbackLoop;
pub use matcher::Matcher;
pub use router::{FeedbackOutcome, HealthReport, IntentRouter, RouterStats};
