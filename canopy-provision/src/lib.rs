//! Canopy provisioning library
//!
//! Brings up one host cluster plus N tenant clusters, imports every tenant
//! into the host's management plane and installs the management software on
//! each tenant. External systems (infrastructure engine, object storage,
//! chart installer, SSH transport) sit behind traits so the orchestrator can
//! be driven against fakes.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod infra;
pub mod installer;
pub mod logging;
pub mod management;
pub mod orchestrator;
pub mod poller;
pub mod probes;
pub mod remote;
pub mod state;
pub mod teardown;
pub mod validation;

pub use config::{CanopyConfig, ConfigError};
pub use error::{Phase2Failure, ProvisionError, ProvisionResult};
pub use orchestrator::{Collaborators, Orchestrator, ProvisioningSession, RunReport};
pub use poller::{poll_until_ready, PollOutcome, PollSpec, PollTimeout};
pub use teardown::teardown;
