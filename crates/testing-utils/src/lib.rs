//! Shared test doubles for the escalator workspace.
//!
//! Provides an in-memory store implementing every repository trait, a
//! programmable notifier, and builders for test entities. Unit and
//! integration tests use these instead of a real database or provider.

pub mod builders;
pub mod mocks;

pub use builders::{owner, ContactBuilder, EscalationBuilder, PolicyBuilder, TaskBuilder};
pub use mocks::{MockNotifier, MockStore};
