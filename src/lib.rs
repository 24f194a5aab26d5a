//! timeline-trigger - Webhook triggers for new items on account timelines.
//!
//! This crate provides a change-detection engine with:
//! - A subscription registry tracking accounts per callback endpoint
//! - One self-rescheduling poll loop per subscription
//! - High-water-mark delta detection over newest-first timeline pages
//! - Signed, fire-and-forget callback delivery

pub mod callback;
pub mod config;
pub mod delta;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod logging;
pub mod model;
pub mod service;
pub mod task;
