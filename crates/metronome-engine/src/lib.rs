//! Tick-driven host for scheduled tasks.
//!
//! The [`Engine`] owns a set of task registrations, evaluates their
//! schedules once per tick and runs whatever is due through the shared
//! [`metronome_task::TaskRunner`]. Configuration comes from a TOML file
//! with `METRONOME_*` environment overrides; run outcomes are kept in a
//! bounded history and optionally streamed over a channel as
//! [`RunReport`]s.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use metronome_engine::{Engine, EngineConfig};
//! use metronome_task::Schedule;
//!
//! # async fn demo(backup: Arc<dyn metronome_task::Task>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = Engine::new(EngineConfig::load(None)?);
//! engine.register(
//!     backup,
//!     Schedule::new().daily_at("2:30")?.without_overlapping(),
//! )?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let engine = tokio::spawn(engine.run(shutdown_rx));
//! # shutdown_tx.send(true)?;
//! # engine.await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod report;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use report::RunReport;
