//! The workspace state machine.
//!
//! `start`/`stop` validate, flip the persisted status, and return; the actual
//! container work runs on a background task. Only this controller writes
//! `Workspace.status`.

use std::sync::Arc;

use choraleia_core::config::{DockerConfig, EXEC_TIMEOUT_SECS};
use choraleia_core::types::{
    ContainerMode, DockerConnectionType, RuntimeType, Workspace, WorkspaceId, WorkspaceRuntime,
    WorkspaceStatus,
};
use choraleia_docker::runner::join_quoted;
use choraleia_docker::{CommandRunner, ContainerSpec, DockerCli, LocalRunner, SshRunner};
use choraleia_ssh::SshPool;
use choraleia_store::Store;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{Result, RuntimeError};
use crate::events::{RuntimeEvent, RuntimeEvents, RuntimePhase};

/// Container labels every managed workspace container carries.
pub const LABEL_MANAGED_BY: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "choraleia";
pub const LABEL_WORKSPACE_ID: &str = "workspace-id";
pub const LABEL_WORKSPACE_NAME: &str = "workspace-name";

/// In-memory state for a workspace whose container is known.
struct WorkspaceEntry {
    container_id: String,
    container_name: String,
    container_ip: Option<String>,
}

pub struct RuntimeController {
    store: Arc<Store>,
    pool: Arc<SshPool>,
    docker_config: DockerConfig,
    events: Arc<RuntimeEvents>,
    entries: DashMap<WorkspaceId, WorkspaceEntry>,
    /// Workspaces with a start task in flight; guards the one-create invariant.
    starting: DashMap<WorkspaceId, ()>,
    /// Test seam: replaces both local and SSH runners when set.
    runner_override: Option<Arc<dyn CommandRunner>>,
}

impl RuntimeController {
    pub fn new(
        store: Arc<Store>,
        pool: Arc<SshPool>,
        docker_config: DockerConfig,
        events: Arc<RuntimeEvents>,
    ) -> Self {
        Self {
            store,
            pool,
            docker_config,
            events,
            entries: DashMap::new(),
            starting: DashMap::new(),
            runner_override: None,
        }
    }

    /// Route every docker command through `runner` instead of the real
    /// local/SSH runners. Integration tests use this to fake a daemon.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner_override = Some(runner);
        self
    }

    pub fn events(&self) -> Arc<RuntimeEvents> {
        Arc::clone(&self.events)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Begin starting a workspace. Returns once the status row reads
    /// `starting`; the bring-up continues in the background. Calling while
    /// already `starting` or `running` is a no-op.
    pub async fn start(self: &Arc<Self>, id: &WorkspaceId) -> Result<()> {
        let workspace = self.store.get_workspace(id)?;

        match workspace.status {
            WorkspaceStatus::Starting | WorkspaceStatus::Running => {
                info!(workspace = %id, status = %workspace.status, "start is a no-op");
                return Ok(());
            }
            WorkspaceStatus::Stopping => {
                return Err(RuntimeError::WrongState {
                    status: workspace.status.to_string(),
                    op: "start",
                });
            }
            WorkspaceStatus::Stopped | WorkspaceStatus::Error => {}
        }

        workspace
            .runtime
            .validate()
            .map_err(RuntimeError::Validation)?;

        // Claim the start. A losing concurrent caller bails out here, which
        // keeps container creation single-shot per workspace.
        if self.starting.insert(id.clone(), ()).is_some() {
            info!(workspace = %id, "start already in flight");
            return Ok(());
        }

        if let Err(e) = self.set_status(id, WorkspaceStatus::Starting, None) {
            self.starting.remove(id);
            return Err(e);
        }

        let controller = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            let result = controller.bring_up(&workspace).await;
            controller.starting.remove(&id);
            match result {
                Ok(()) => {
                    let _ = controller.set_status(&id, WorkspaceStatus::Running, None);
                    controller.events.publish(RuntimeEvent::Phase {
                        workspace_id: id.clone(),
                        phase: RuntimePhase::Ready,
                    });
                }
                Err(e) => {
                    error!(workspace = %id, error = %e, "bring-up failed");
                    let _ = controller.set_status(&id, WorkspaceStatus::Error, Some(&e.to_string()));
                }
            }
        });
        Ok(())
    }

    /// Begin stopping a workspace. With `force`, teardown failures are logged
    /// and the workspace still ends `stopped`; without it they mark `error`.
    pub async fn stop(self: &Arc<Self>, id: &WorkspaceId, force: bool) -> Result<()> {
        let workspace = self.store.get_workspace(id)?;

        match workspace.status {
            WorkspaceStatus::Stopped | WorkspaceStatus::Stopping => {
                return Ok(());
            }
            WorkspaceStatus::Starting if !force => {
                return Err(RuntimeError::WrongState {
                    status: workspace.status.to_string(),
                    op: "stop",
                });
            }
            _ => {}
        }

        self.set_status(id, WorkspaceStatus::Stopping, None)?;

        let controller = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            match controller.tear_down(&workspace).await {
                Ok(()) => {
                    let _ = controller.set_status(&id, WorkspaceStatus::Stopped, None);
                }
                Err(e) if force => {
                    warn!(workspace = %id, error = %e, "forced stop: teardown error ignored");
                    let _ = controller.set_status(&id, WorkspaceStatus::Stopped, None);
                }
                Err(e) => {
                    error!(workspace = %id, error = %e, "stop failed");
                    let _ = controller.set_status(&id, WorkspaceStatus::Error, Some(&e.to_string()));
                }
            }
            controller.entries.remove(&id);
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bring-up / teardown
    // -----------------------------------------------------------------------

    async fn bring_up(&self, workspace: &Workspace) -> Result<()> {
        match workspace.runtime.runtime_type {
            RuntimeType::Local => self.bring_up_local(workspace).await,
            RuntimeType::DockerLocal | RuntimeType::DockerRemote => {
                self.bring_up_docker(workspace).await
            }
        }
    }

    async fn bring_up_local(&self, workspace: &Workspace) -> Result<()> {
        let workdir = shellexpand::tilde(&workspace.runtime.work_dir_host).into_owned();
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| RuntimeError::Validation(format!("workdir {workdir}: {e}")))?;
        info!(workspace = %workspace.id, workdir = %workdir, "local runtime ready");
        Ok(())
    }

    async fn bring_up_docker(&self, workspace: &Workspace) -> Result<()> {
        let cli = self.cli_for(&workspace.runtime).await?;
        let mut runtime = workspace.runtime.clone();

        match runtime.container_mode {
            Some(ContainerMode::Existing) => {
                let reference = runtime
                    .container_name
                    .clone()
                    .or_else(|| runtime.container_id.clone())
                    .ok_or_else(|| {
                        RuntimeError::Validation(
                            "existing-container runtime has no container reference".into(),
                        )
                    })?;
                let info = cli
                    .inspect(&reference)
                    .await?
                    .ok_or_else(|| RuntimeError::NoContainer(reference.clone()))?;
                if !info.running {
                    self.publish_phase(&workspace.id, RuntimePhase::Starting);
                    cli.start(&reference).await?;
                }
                let info = cli
                    .inspect(&reference)
                    .await?
                    .ok_or_else(|| RuntimeError::NoContainer(reference))?;
                runtime.container_id = Some(info.id.clone());
                runtime.container_name = Some(info.name.clone());
                runtime.container_ip = info.ip_on(None);
                self.finish_docker_bring_up(workspace, runtime)?;
                Ok(())
            }
            Some(ContainerMode::New) => self.create_and_start(workspace, &cli, runtime).await,
            None => Err(RuntimeError::Validation(
                "docker runtime requires container_mode".into(),
            )),
        }
    }

    async fn create_and_start(
        &self,
        workspace: &Workspace,
        cli: &DockerCli,
        mut runtime: WorkspaceRuntime,
    ) -> Result<()> {
        let image = runtime
            .new_container_image
            .clone()
            .unwrap_or_else(|| self.docker_config.default_image.clone());

        // Pulling. Failure is swallowed: `docker create` retries implicitly
        // against the local image cache.
        self.publish_phase(&workspace.id, RuntimePhase::Pulling);
        let (tx, mut rx) = mpsc::channel::<String>(32);
        let events = Arc::clone(&self.events);
        let ws_id = workspace.id.clone();
        let forward = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                events.publish(RuntimeEvent::PullProgress {
                    workspace_id: ws_id.clone(),
                    line,
                });
            }
        });
        if let Err(e) = cli.pull(&image, Some(tx)).await {
            warn!(workspace = %workspace.id, image = %image, error = %e,
                  "pull failed, continuing with local image");
        }
        let _ = forward.await;

        // Creating.
        self.publish_phase(&workspace.id, RuntimePhase::Creating);
        let desired_name = runtime
            .new_container_name
            .clone()
            .unwrap_or_else(|| format!("choraleia-{}", workspace.name));
        let name = self
            .resolve_name_collision(cli, &desired_name, &workspace.id)
            .await?;

        let host_dir = shellexpand::tilde(&runtime.work_dir_host).into_owned();
        if workspace.runtime.runtime_type == RuntimeType::DockerLocal {
            tokio::fs::create_dir_all(&host_dir)
                .await
                .map_err(|e| RuntimeError::Validation(format!("workdir {host_dir}: {e}")))?;
        }
        let container_dir = runtime
            .work_dir_container
            .clone()
            .unwrap_or_else(|| self.docker_config.container_workdir.clone());

        let spec = ContainerSpec {
            image,
            name: name.clone(),
            labels: vec![
                (LABEL_MANAGED_BY.into(), MANAGED_BY_VALUE.into()),
                (LABEL_WORKSPACE_ID.into(), workspace.id.to_string()),
                (LABEL_WORKSPACE_NAME.into(), workspace.name.clone()),
            ],
            binds: vec![(host_dir, container_dir)],
            env: vec![],
            memory_limit: self.docker_config.memory_limit.clone(),
            cpu_limit: self.docker_config.cpu_limit.clone(),
            shm_size: self.docker_config.shm_size.clone(),
            network: None,
            command: vec!["sleep".into(), "infinity".into()],
        };

        let container_id = match cli.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                // Nothing was created; no cleanup needed.
                return Err(e.into());
            }
        };

        // Starting. From here on a failure leaves a partial container that
        // must be force-removed before surfacing the error.
        self.publish_phase(&workspace.id, RuntimePhase::Starting);
        if let Err(e) = cli.start(&container_id).await {
            let _ = cli.remove(&container_id, true).await;
            return Err(e.into());
        }

        let info = match cli.inspect(&container_id).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                let _ = cli.remove(&container_id, true).await;
                return Err(RuntimeError::NoContainer(container_id));
            }
            Err(e) => {
                let _ = cli.remove(&container_id, true).await;
                return Err(e.into());
            }
        };

        runtime.container_id = Some(info.id.clone());
        runtime.container_name = Some(name);
        runtime.container_ip = info.ip_on(None);
        self.finish_docker_bring_up(workspace, runtime)?;
        Ok(())
    }

    /// Apply the collision policy: a prior container carrying our
    /// workspace-id label is a stale instance and gets removed; a foreign
    /// container keeps its name and ours is suffixed.
    async fn resolve_name_collision(
        &self,
        cli: &DockerCli,
        desired: &str,
        workspace_id: &WorkspaceId,
    ) -> Result<String> {
        match cli.inspect(desired).await? {
            None => Ok(desired.to_string()),
            Some(existing) => {
                let ours = existing
                    .labels
                    .get(LABEL_WORKSPACE_ID)
                    .is_some_and(|v| v == workspace_id.as_str());
                if ours {
                    info!(container = %desired, "removing stale container of this workspace");
                    cli.remove(desired, true).await?;
                    Ok(desired.to_string())
                } else {
                    let suffix = uuid::Uuid::new_v4().simple().to_string();
                    let mangled = format!("{desired}-{}", &suffix[..8]);
                    warn!(
                        desired,
                        mangled = %mangled,
                        "name collides with a foreign container"
                    );
                    Ok(mangled)
                }
            }
        }
    }

    fn finish_docker_bring_up(
        &self,
        workspace: &Workspace,
        runtime: WorkspaceRuntime,
    ) -> Result<()> {
        self.entries.insert(
            workspace.id.clone(),
            WorkspaceEntry {
                container_id: runtime.container_id.clone().unwrap_or_default(),
                container_name: runtime.container_name.clone().unwrap_or_default(),
                container_ip: runtime.container_ip.clone(),
            },
        );
        self.store.set_workspace_runtime(&workspace.id, &runtime)?;
        Ok(())
    }

    async fn tear_down(&self, workspace: &Workspace) -> Result<()> {
        if !workspace.runtime.is_docker() {
            return Ok(());
        }
        let cli = self.cli_for(&workspace.runtime).await?;
        let reference = self.container_ref(&workspace.id, &workspace.runtime)?;

        cli.stop(&reference, 30).await?;
        // Containers we created are disposable; attached ones are not ours to
        // delete.
        if workspace.runtime.container_mode == Some(ContainerMode::New) {
            cli.remove(&reference, true).await?;
        }
        info!(workspace = %workspace.id, container = %reference, "container stopped");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reconcile
    // -----------------------------------------------------------------------

    /// Rebuild in-memory entries after a restart: inspect each persisted
    /// container and re-adopt those still running with a resolvable address.
    /// Everything else is left for the normal stop/restart flow.
    pub async fn reconcile(&self) -> Result<()> {
        for workspace in self.store.list_workspaces()? {
            if !workspace.runtime.is_docker() {
                continue;
            }
            let Some(reference) = workspace
                .runtime
                .container_name
                .clone()
                .or_else(|| workspace.runtime.container_id.clone())
            else {
                continue;
            };

            let cli = match self.cli_for(&workspace.runtime).await {
                Ok(cli) => cli,
                Err(e) => {
                    warn!(workspace = %workspace.id, error = %e, "reconcile: docker unreachable");
                    continue;
                }
            };
            match cli.inspect(&reference).await {
                Ok(Some(info)) if info.running => {
                    let ip = info.ip_on(None);
                    self.entries.insert(
                        workspace.id.clone(),
                        WorkspaceEntry {
                            container_id: info.id.clone(),
                            container_name: info.name.clone(),
                            container_ip: ip.clone(),
                        },
                    );
                    let mut runtime = workspace.runtime.clone();
                    runtime.container_id = Some(info.id);
                    runtime.container_name = Some(info.name);
                    runtime.container_ip = ip;
                    self.store.set_workspace_runtime(&workspace.id, &runtime)?;
                    self.set_status(&workspace.id, WorkspaceStatus::Running, None)?;
                    info!(workspace = %workspace.id, "reconciled running container");
                }
                Ok(_) => {
                    info!(workspace = %workspace.id, "container not running, left to stop flow");
                }
                Err(e) => {
                    warn!(workspace = %workspace.id, error = %e, "reconcile inspect failed");
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Exec channel
    // -----------------------------------------------------------------------

    /// Run `argv` inside the workspace container and return combined
    /// stdout+stderr. Bounded by the 5-minute exec deadline.
    pub async fn exec(&self, id: &WorkspaceId, argv: &[String]) -> Result<String> {
        let workspace = self.store.get_workspace(id)?;
        if !workspace.runtime.is_docker() {
            return Err(RuntimeError::Validation(
                "exec channel requires a docker runtime".into(),
            ));
        }
        let cli = self.cli_for(&workspace.runtime).await?;
        let reference = self.container_ref(id, &workspace.runtime)?;
        let script = join_quoted(argv);

        let out = cli.exec_sh(&reference, &script).await.map_err(|e| match e {
            choraleia_docker::DockerError::Timeout { .. } => RuntimeError::ExecTimeout {
                secs: EXEC_TIMEOUT_SECS,
            },
            other => other.into(),
        })?;
        let mut combined = out.stdout_str();
        combined.push_str(&out.stderr_str());
        Ok(combined)
    }

    /// Resolve the container reference: the in-memory entry first, then the
    /// persisted name, then the persisted id (names survive restarts and are
    /// what reconcile stores first).
    fn container_ref(&self, id: &WorkspaceId, runtime: &WorkspaceRuntime) -> Result<String> {
        if let Some(entry) = self.entries.get(id) {
            if !entry.container_name.is_empty() {
                return Ok(entry.container_name.clone());
            }
            if !entry.container_id.is_empty() {
                return Ok(entry.container_id.clone());
            }
        }
        runtime
            .container_name
            .clone()
            .or_else(|| runtime.container_id.clone())
            .ok_or_else(|| RuntimeError::NoContainer(id.to_string()))
    }

    /// The container IP the session multiplexer and browser controller use.
    pub fn container_ip(&self, id: &WorkspaceId) -> Option<String> {
        self.entries.get(id).and_then(|e| e.container_ip.clone())
    }

    /// Docker CLI plus container reference for callers that need direct
    /// container access (the file-browsing surface).
    pub async fn docker_access(&self, id: &WorkspaceId) -> Result<(DockerCli, String)> {
        let workspace = self.store.get_workspace(id)?;
        if !workspace.runtime.is_docker() {
            return Err(RuntimeError::Validation(
                "workspace has no docker runtime".into(),
            ));
        }
        let cli = self.cli_for(&workspace.runtime).await?;
        let reference = self.container_ref(id, &workspace.runtime)?;
        Ok((cli, reference))
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    /// Build the docker CLI front-end for a runtime: a local process runner,
    /// or the runner dispatching through the pooled SSH client of the
    /// runtime's docker-host asset. No local fallback exists for remote
    /// runtimes.
    async fn cli_for(&self, runtime: &WorkspaceRuntime) -> Result<DockerCli> {
        if let Some(runner) = &self.runner_override {
            return Ok(DockerCli::new(Arc::clone(runner)));
        }
        match runtime.runtime_type {
            RuntimeType::Local | RuntimeType::DockerLocal => {
                Ok(DockerCli::new(Arc::new(LocalRunner)))
            }
            RuntimeType::DockerRemote => {
                let asset_id = runtime.docker_asset_id.clone().ok_or_else(|| {
                    RuntimeError::Validation("docker_remote runtime missing asset".into())
                })?;
                let asset = self.store.get_asset(&asset_id)?;
                let docker_host = asset.docker_host.as_ref().ok_or_else(|| {
                    RuntimeError::Validation(format!("asset {asset_id} is not a docker host"))
                })?;
                match docker_host.connection_type {
                    DockerConnectionType::Local => Ok(DockerCli::new(Arc::new(LocalRunner))),
                    DockerConnectionType::Ssh => {
                        let ssh_asset_id = docker_host.ssh_asset_id.clone().ok_or_else(|| {
                            RuntimeError::Validation("docker host missing ssh_asset_id".into())
                        })?;
                        let ssh_asset = self.store.get_asset(&ssh_asset_id)?;
                        let endpoint = ssh_asset.ssh.as_ref().ok_or_else(|| {
                            RuntimeError::Validation(format!(
                                "asset {ssh_asset_id} has no ssh config"
                            ))
                        })?;
                        let client = self.pool.get_or_connect(&ssh_asset_id, endpoint).await?;
                        Ok(DockerCli::new(Arc::new(SshRunner::new(client))))
                    }
                }
            }
        }
    }

    fn set_status(
        &self,
        id: &WorkspaceId,
        status: WorkspaceStatus,
        message: Option<&str>,
    ) -> Result<()> {
        self.store.set_workspace_status(id, status, message)?;
        self.events.publish(RuntimeEvent::StatusChanged {
            workspace_id: id.clone(),
            status,
            message: message.map(String::from),
        });
        Ok(())
    }

    fn publish_phase(&self, id: &WorkspaceId, phase: RuntimePhase) {
        self.events.publish(RuntimeEvent::Phase {
            workspace_id: id.clone(),
            phase,
        });
    }
}
