//! Threatwatch - a monitoring and threat-detection oracle.
//!
//! # Overview
//!
//! Threatwatch ingests readings from registered field sensors and
//! observations from satellite-imagery providers, classifies device health,
//! raises time-bounded threat alerts with provenance and predicted impact,
//! and tracks regional resource levels with trend and depletion projections.
//! A scheduler runs the full ingest, detect, monitor and expire cycle on a
//! fixed interval.
//!
//! All state is in memory and owned by an [`oracle::Oracle`] instance.
//!
//! # Modules
//!
//! - [`model`]: Devices, alerts, resource metrics, observations and HTTP bodies
//! - [`error`]: Error types
//! - [`config`]: Environment-driven configuration
//! - [`classifier`]: Device status classification
//! - [`devices`]: Device registry
//! - [`queue`]: Critical-signal detection queue
//! - [`alerts`]: Alert store
//! - [`providers`]: Provider registry, HTTP clients and simulated sources
//! - [`detection`]: Threat detection rules and impact estimation
//! - [`resources`]: Regional resource monitoring
//! - [`oracle`]: The service instance
//! - [`orchestrator`]: Cycle scheduler and detection worker
//! - [`api`]: HTTP API handlers

pub mod alerts;
pub mod api;
pub mod classifier;
pub mod config;
pub mod detection;
pub mod devices;
pub mod error;
pub mod model;
pub mod oracle;
pub mod orchestrator;
pub mod providers;
pub mod queue;
pub mod resources;
