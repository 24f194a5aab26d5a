//! Background tasks driving subscription polling.

pub mod poll_scheduler;
