//! Follow-up rules, trigger evaluation, and the recurring scheduler.

pub mod engine;
pub mod model;
pub mod scheduler;

pub use engine::evaluate;
pub use model::{ActionStatus, FollowUpAction, FollowUpRule, FollowUpTrigger, RuleStatus, TriggerType};
pub use scheduler::{spawn_ticker, FollowUpScheduler, ProcessReport, TickReport};
