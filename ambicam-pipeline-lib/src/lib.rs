//! Camera-driven ambient lighting pipeline.
//!
//! A camera watching a display is sampled at fixed positions along the screen
//! edges. The samples are white-balanced, weighted and smoothed by the
//! [`sampler`], handed over through a single-slot [`mailbox`] and written to
//! an LED controller by the [`emitter`], which can interpolate between
//! captured frames. [`controller::Controller`] runs at most one
//! [`pipeline::Pipeline`] at a time.

pub mod color;
pub mod config;
pub mod controller;
pub mod emitter;
pub mod frame;
pub mod geometry;
pub mod mailbox;
mod pacing;
pub mod pipeline;
pub mod rainbow;
pub mod sampler;
pub mod source;
pub mod transport;
pub mod white_balance;

#[cfg(test)]
mod testing;

pub use color::{Color, ColorVector};
pub use config::{Config, ConfigError, ConfigPatch, ConfigStore, LogLevel};
pub use controller::{Controller, Status};
pub use pipeline::{PipelineState, StartError, Variant};
