pub mod entities;
pub mod events;
pub mod failure;
pub mod messages;
pub mod ports;
pub mod repositories;
pub mod state;

pub use entities::*;
pub use escalator_errors::{EscalatorError, EscalatorResult};
pub use events::*;
pub use failure::FailureReason;
pub use ports::*;
pub use repositories::*;
pub use state::{EscalationStateManager, RetryConfig, RetryDecision};
