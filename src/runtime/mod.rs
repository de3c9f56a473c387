//! Container runtime capability.
//!
//! The orchestrator only talks to containers through [`ContainerRuntime`].
//! [`docker::DockerRuntime`] implements it against the Docker Engine API;
//! tests substitute an in-process fake.
//!
//! Every call blocks the calling thread until the runtime answers. There is
//! no internal timeout and no cancellation.

pub mod docker;

pub use docker::DockerRuntime;

use crate::error::Result;
use crate::model::container::{ContainerHandle, ExecOutput};

/// Operations the orchestrator needs from a single-node container runtime.
pub trait ContainerRuntime {
    /// Create and start a container from `image`, publishing `smtp_port/tcp`
    /// on an ephemeral host port. Returns without waiting for readiness.
    fn create(&self, image: &str, smtp_port: u16) -> Result<ContainerHandle>;

    /// Look a container up by id or name. Absent containers yield
    /// [`crate::error::PoolError::NotFound`].
    fn get(&self, id: &str) -> Result<ContainerHandle>;

    /// List containers; `all = false` restricts to running ones.
    fn list(&self, all: bool) -> Result<Vec<ContainerHandle>>;

    /// Remove a container, killing it first when `force` is set.
    fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Start a stopped container.
    fn start(&self, id: &str) -> Result<()>;

    /// Run `command` inside the container and collect its combined output.
    fn exec(&self, id: &str, command: &[&str]) -> Result<ExecOutput>;

    /// One non-streaming resource usage snapshot, in the runtime's own JSON
    /// shape (`cpu_stats`, `precpu_stats`, `memory_stats`).
    fn stats(&self, id: &str) -> Result<serde_json::Value>;

    /// The last `tail` lines of captured stdout/stderr.
    fn logs(&self, id: &str, tail: usize) -> Result<String>;
}
