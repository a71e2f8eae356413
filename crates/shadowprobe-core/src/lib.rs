//! # shadowprobe-core
//!
//! Core library for end-to-end device/cloud reconciliation tests.
//!
//! A reconciliation test drives a simulated embedded device running real
//! firmware, applies a physical stimulus (a button press on a digital input
//! line), waits for the effect to propagate, then reads the device shadow held
//! by a cloud state store and checks that the reported sensor value falls
//! inside an expected window. The trial repeats N times against one long-lived
//! simulator session.
//!
//! ## Modules
//!
//! - [`harness`] - The trial loop: setup, stimulus, observe, assert, teardown
//! - [`simulator`] - The [`DeviceSimulator`](simulator::DeviceSimulator) collaborator trait
//! - [`vlab`] - Newline-delimited JSON client for a virtual-lab simulator bridge
//! - [`launcher`] - Spawns and health-checks the simulator bridge process
//! - [`shadow`] - The [`ShadowStore`](shadow::ShadowStore) trait and shadow documents
//! - [`aws`] - AWS IoT data-plane shadow client
//! - [`sigv4`] - AWS Signature Version 4 request signing
//! - [`clock`] - Wall-clock waits behind a swappable [`Clock`](clock::Clock)
//! - [`config`] - JSON harness configuration
//! - [`session`] - Session state and the persistent trial log
//! - [`report`] - Per-trial records and run reports
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shadowprobe_core::aws::AwsIotShadowClient;
//! use shadowprobe_core::clock::TokioClock;
//! use shadowprobe_core::config::HarnessConfig;
//! use shadowprobe_core::harness::ReconciliationHarness;
//! use shadowprobe_core::vlab::VlabClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::load(None)?;
//! let store = Arc::new(AwsIotShadowClient::from_env(&config.shadow)?);
//! let simulator = VlabClient::new(config.simulator.addr()?);
//!
//! let mut harness = ReconciliationHarness::new(
//!     config,
//!     Box::new(simulator),
//!     store,
//!     Arc::new(TokioClock),
//! )?;
//! let report = harness.run().await;
//! assert!(report.all_passed());
//! # Ok(())
//! # }
//! ```

pub mod aws;
pub mod clock;
pub mod config;
pub mod error;
pub mod harness;
pub mod launcher;
pub mod report;
pub mod session;
pub mod shadow;
pub mod sigv4;
pub mod simulator;
pub mod stimulus;
pub mod vlab;
pub mod window;
