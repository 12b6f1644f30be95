//! Test kit for the video redundancy engine.
//!
//! - In-memory collaborators: [`ManualClock`], [`MemoryCatalog`],
//!   [`MemoryFetcher`], [`MemoryStorage`]
//! - [`LoopbackNetwork`] - an in-process federation connecting several
//!   engines, with silent, lossy and unreachable hosts
//! - [`TestInstance`] - one fully wired engine on a loopback network
//! - [`fixtures`] - hosts, videos and strategy configs
//! - Tracing configuration for test output
//!
//! # Example
//!
//! ```rust,ignore
//! use vrd_testkit::{LoopbackNetwork, TestInstance, fixtures};
//!
//! #[tokio::test]
//! async fn caches_a_remote_video() {
//!     vrd_testkit::init_test_tracing();
//!
//!     let network = LoopbackNetwork::new();
//!     let origin = TestInstance::new(&network, fixtures::engine_config("origin.example"));
//!     let cacher = TestInstance::new(&network, fixtures::engine_config("cache.example")
//!         .with_strategy(fixtures::recently_added(10_000)));
//!
//!     let video = fixtures::video(1, "origin.example").with_file(720, 1_000);
//!     origin.publish(&video);
//!     cacher.publish(&video);
//!
//!     let (tick, drained) = cacher.tick_and_drain("recently-added").await;
//!     assert_eq!(tick.admitted, 1);
//!     assert_eq!(drained.completed, 1);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]

mod artifacts;
mod catalog;
mod clock;
pub mod fixtures;
mod harness;
mod network;
mod tracing_config;

pub use artifacts::{MemoryFetcher, MemoryStorage};
pub use catalog::MemoryCatalog;
pub use clock::ManualClock;
pub use harness::TestInstance;
pub use network::{LoopbackNetwork, LoopbackTransport, RecordingHandler, SentMessage};
pub use tracing_config::{init_test_tracing, init_test_tracing_with_filter};
