//! Process-wide tracing setup for stock ledger services and tests.

pub mod subscriber;

pub use subscriber::{LogFormat, init, init_for_tests, init_with};
