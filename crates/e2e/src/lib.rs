//! Lumina E2E Scenario Engine
//!
//! This crate drives a real browser against the running Lumina web studio
//! and verifies that UI states appear or disappear within bounded time:
//! - Parses declarative YAML scenarios
//! - Resolves layout-aware, disambiguated element descriptors
//! - Waits only through bounded condition polls
//! - Simulates viewport and connectivity changes per session
//! - Synthesizes upload fixtures and captures screenshot evidence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Scenario Runner (Rust)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── wait_for_app()            (app readiness probe)      │
//! │    └── run_scenarios() -> SuiteResult                       │
//! │          └── ScenarioExecutor::run() -> ScenarioOutcome     │
//! │                ├── EnvironmentController (viewport, network)│
//! │                ├── Resolver + wait_for (locate and poll)    │
//! │                ├── FixtureSynthesizer (upload files)        │
//! │                └── EvidenceRecorder (screenshots)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Driver / Page                                              │
//! │    ├── PlaywrightDriver (Node bridge, JSON lines)           │
//! │    └── SimDriver (in-process simulated document)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod config;
pub mod driver;
pub mod environment;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod fixtures;
pub mod locator;
pub mod playwright;
pub mod poller;
pub mod runner;
pub mod session;
pub mod sim;
pub mod spec;

pub use config::{Browser, HarnessConfig, Timeouts};
pub use driver::{Driver, Locator, Page, Query, Viewport};
pub use error::{E2eError, E2eResult};
pub use executor::{RunPhase, ScenarioExecutor, ScenarioOutcome, ScenarioStatus};
pub use locator::{ElementDescriptor, ElementRef, Pick, Region};
pub use runner::{SuiteResult, TestRunner};
pub use spec::{Scenario, Step, Target};
