//! [`ContainerRuntime`] backed by the Docker Engine API (via bollard).
//!
//! bollard is async; this adapter owns a current-thread tokio runtime and
//! blocks on each request so the rest of the crate stays synchronous.

use std::collections::HashMap;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StatsOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding};
use bollard::Docker;
use futures_util::StreamExt;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::ContainerRuntime;
use crate::error::{PoolError, Result};
use crate::model::container::{ContainerHandle, ContainerStatus, ExecOutput};

/// Docker Engine client with its own blocking executor.
pub struct DockerRuntime {
    docker: Docker,
    rt: Runtime,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the local socket)
    /// and check the daemon answers.
    pub fn connect() -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PoolError::Runtime(format!("cannot start executor: {e}")))?;
        let docker = {
            let _guard = rt.enter();
            Docker::connect_with_local_defaults().map_err(|e| PoolError::Runtime(e.to_string()))?
        };
        rt.block_on(docker.ping())
            .map_err(|e| PoolError::Runtime(format!("docker daemon unreachable: {e}")))?;
        info!("Connected to docker daemon");
        Ok(Self { docker, rt })
    }

    fn inspect(&self, id: &str) -> Result<ContainerInspectResponse> {
        self.rt
            .block_on(
                self.docker
                    .inspect_container(id, None::<InspectContainerOptions>),
            )
            .map_err(|e| api_error(id, e))
    }
}

impl ContainerRuntime for DockerRuntime {
    fn create(&self, image: &str, smtp_port: u16) -> Result<ContainerHandle> {
        let port_key = format!("{smtp_port}/tcp");
        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            [(port_key.clone(), HashMap::new())].into_iter().collect();
        // No host port: the daemon picks an ephemeral one.
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = [(
            port_key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: None,
            }]),
        )]
        .into_iter()
        .collect();

        let config = Config {
            image: Some(image.to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .rt
            .block_on(
                self.docker
                    .create_container(None::<CreateContainerOptions<String>>, config),
            )
            .map_err(|e| PoolError::Runtime(format!("cannot create from '{image}': {e}")))?;
        self.rt
            .block_on(
                self.docker
                    .start_container(&created.id, None::<StartContainerOptions<String>>),
            )
            .map_err(|e| api_error(&created.id, e))?;

        info!(container = %created.id, image, "Created container");
        self.get(&created.id)
    }

    fn get(&self, id: &str) -> Result<ContainerHandle> {
        Ok(handle_from_inspect(self.inspect(id)?))
    }

    fn list(&self, all: bool) -> Result<Vec<ContainerHandle>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let summaries = self
            .rt
            .block_on(self.docker.list_containers(Some(options)))
            .map_err(|e| PoolError::Runtime(e.to_string()))?;

        let mut handles = Vec::with_capacity(summaries.len());
        for id in summaries.into_iter().filter_map(|s| s.id) {
            match self.get(&id) {
                Ok(handle) => handles.push(handle),
                // Removed between listing and inspection.
                Err(PoolError::NotFound(_)) => debug!(container = %id, "Container vanished"),
                Err(e) => return Err(e),
            }
        }
        Ok(handles)
    }

    fn remove(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.rt
            .block_on(self.docker.remove_container(id, Some(options)))
            .map_err(|e| api_error(id, e))
    }

    fn start(&self, id: &str) -> Result<()> {
        self.rt
            .block_on(
                self.docker
                    .start_container(id, None::<StartContainerOptions<String>>),
            )
            .map_err(|e| api_error(id, e))
    }

    fn exec(&self, id: &str, command: &[&str]) -> Result<ExecOutput> {
        debug!(container = %id, cmd = ?command, "Executing command");
        let options = CreateExecOptions::<String> {
            cmd: Some(command.iter().map(|s| s.to_string()).collect()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        self.rt.block_on(async {
            let exec = self
                .docker
                .create_exec(id, options)
                .await
                .map_err(|e| exec_error(id, e))?;

            let mut output = Vec::new();
            if let StartExecResults::Attached { output: mut stream, .. } = self
                .docker
                .start_exec(&exec.id, None)
                .await
                .map_err(|e| exec_error(id, e))?
            {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| PoolError::exec(id, e.to_string()))?;
                    output.extend_from_slice(&chunk.into_bytes());
                }
            }

            let inspected = self
                .docker
                .inspect_exec(&exec.id)
                .await
                .map_err(|e| PoolError::exec(id, e.to_string()))?;

            Ok(ExecOutput {
                exit_code: inspected.exit_code.unwrap_or(-1),
                output,
            })
        })
    }

    fn stats(&self, id: &str) -> Result<serde_json::Value> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let snapshot = self.rt.block_on(async {
            let mut stream = self.docker.stats(id, Some(options));
            stream.next().await
        });
        match snapshot {
            Some(Ok(stats)) => {
                serde_json::to_value(stats).map_err(|e| PoolError::Parse(e.to_string()))
            }
            Some(Err(e)) => Err(api_error(id, e)),
            None => Err(PoolError::Runtime(format!("no stats returned for '{id}'"))),
        }
    }

    fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        self.rt.block_on(async {
            let mut stream = self.docker.logs(id, Some(options));
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                text.push_str(&chunk.map_err(|e| api_error(id, e))?.to_string());
            }
            Ok(text)
        })
    }
}

/// Runtime-owned state reduced to the fields the pool cares about.
fn handle_from_inspect(resp: ContainerInspectResponse) -> ContainerHandle {
    let state = resp.state.unwrap_or_default();
    let status = state
        .status
        .map(|s| ContainerStatus::from_runtime(&s.to_string()))
        .unwrap_or(ContainerStatus::Unknown);
    let started_at = if status == ContainerStatus::Running {
        state.started_at
    } else {
        None
    };
    ContainerHandle {
        id: resp.id.unwrap_or_default(),
        name: resp
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        status,
        started_at,
    }
}

fn api_error(id: &str, e: bollard::errors::Error) -> PoolError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => PoolError::NotFound(format!("container '{id}'")),
        other => PoolError::Runtime(other.to_string()),
    }
}

fn exec_error(id: &str, e: bollard::errors::Error) -> PoolError {
    match api_error(id, e) {
        PoolError::Runtime(reason) => PoolError::exec(id, reason),
        other => other,
    }
}
