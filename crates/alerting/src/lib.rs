//! Alerting System
//!
//! Provides the alarm notifier contract and a non-blocking tone notifier.

mod notifier;

pub use notifier::{AlertNotifier, ToneConfig, ToneNotifier};
