pub mod database;
pub mod notifier;

pub use database::postgres::{
    PostgresEngagementRepository, PostgresEscalationRepository, PostgresTaskRepository,
};
pub use notifier::resend::ResendNotifier;
