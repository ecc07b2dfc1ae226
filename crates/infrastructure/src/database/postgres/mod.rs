pub mod postgres_engagement_repository;
pub mod postgres_escalation_repository;
pub mod postgres_task_repository;

pub use postgres_engagement_repository::PostgresEngagementRepository;
pub use postgres_escalation_repository::PostgresEscalationRepository;
pub use postgres_task_repository::PostgresTaskRepository;
