pub mod scheduler;

pub use scheduler::{
    EscalationScheduler, ScheduleItemError, ScheduleSummary, ScheduledEscalation,
};
