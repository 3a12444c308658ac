//! Progress tracking and analytics for pixel-art templates on a shared canvas.
//!
//! A [`template::Template`] is measured against a [`canvas::CanvasSnapshot`];
//! counts are appended to the [`store::ProgressStore`] on a 5-minute grid and
//! turned into speeds, ETAs and rankings by [`analytics`].  The
//! [`tracker::Tracker`] ties the registry, store and render pool together.

#![allow(clippy::too_many_arguments)]

pub mod logger;

pub mod analytics;
pub mod canvas;
pub mod error;
pub mod pool;
pub mod recorder;
pub mod registry;
pub mod render;
pub mod report;
pub mod settings;
pub mod store;
pub mod template;
pub mod tracker;

pub use error::{Result, TrackerError};
