//! Sandboxed multi-language code execution.
//!
//! Two strategies share one contract ([`CodeExecutor`]):
//! - persistent workers: [`WorkerPool`] keeps one container per language
//!   alive and [`SessionClient`] talks to it over a WebSocket
//! - [`EphemeralRunner`]: a single-use image and container per job
//!
//! [`ExecutionCoordinator`] sits in front of either and owns request
//! validation and result normalization.

pub mod context;
pub mod coordinator;
pub mod docker;
pub mod ephemeral;
pub mod error;
pub mod language_config;
pub mod runtime;
pub mod service;
pub mod session;
pub mod supervisor;

pub use coordinator::{CodeExecutor, ExecutionCoordinator};
pub use docker::DockerRuntime;
pub use ephemeral::EphemeralRunner;
pub use error::ExecutorError;
pub use language_config::{LanguageConfig, LanguageConfigManager};
pub use runtime::ContainerRuntime;
pub use service::{ExecutionService, ServiceSettings, Strategy};
pub use session::SessionClient;
pub use supervisor::{WorkerHandle, WorkerPool};
