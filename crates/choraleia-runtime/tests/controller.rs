// Controller behaviour against a scripted docker daemon: single-create under
// concurrent starts, fresh containers across stop/start, collision policy,
// and the exec-channel fallback order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use choraleia_core::config::{DockerConfig, SshDefaults};
use choraleia_core::types::{
    ContainerMode, RuntimeType, Workspace, WorkspaceId, WorkspaceRuntime, WorkspaceStatus,
};
use choraleia_docker::{CommandRunner, DockerError, RunOutput};
use choraleia_runtime::{RuntimeController, RuntimeEvents};
use choraleia_ssh::SshPool;
use choraleia_store::Store;

struct MockDocker {
    calls: Mutex<Vec<String>>,
    creates: AtomicUsize,
    /// Reference -> inspect JSON. Anything else is "No such object".
    inspectable: Mutex<HashMap<String, String>>,
}

impl MockDocker {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            creates: AtomicUsize::new(0),
            inspectable: Mutex::new(HashMap::new()),
        }
    }

    fn register_running(&self, reference: &str, id: &str, labels: &[(&str, &str)]) {
        let labels_json: Vec<String> = labels
            .iter()
            .map(|(k, v)| format!(r#""{k}": "{v}""#))
            .collect();
        let json = format!(
            r#"[{{
                "Id": "{id}",
                "Name": "/{reference}",
                "State": {{ "Running": true }},
                "Config": {{ "Labels": {{ {} }} }},
                "NetworkSettings": {{ "Networks": {{ "bridge": {{ "IPAddress": "172.17.0.9" }} }} }}
            }}]"#,
            labels_json.join(", ")
        );
        self.inspectable
            .lock()
            .unwrap()
            .insert(reference.to_string(), json);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn ok(stdout: &str) -> RunOutput {
        RunOutput {
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
            exit_code: 0,
        }
    }

    fn fail(stderr: &str) -> RunOutput {
        RunOutput {
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
            exit_code: 1,
        }
    }
}

#[async_trait]
impl CommandRunner for MockDocker {
    async fn run(
        &self,
        argv: &[String],
        _timeout: Duration,
    ) -> Result<RunOutput, DockerError> {
        let joined = argv.join(" ");
        self.calls.lock().unwrap().push(joined);

        match argv.get(1).map(String::as_str) {
            Some("pull") => Ok(Self::ok("Pull complete")),
            Some("image") => Ok(Self::ok("[]")),
            Some("create") => {
                let n = self.creates.fetch_add(1, Ordering::SeqCst);
                let id = format!("cid-{n}");
                // A created container becomes inspectable as running under
                // both its id and its --name argument.
                let name = argv
                    .iter()
                    .position(|a| a == "--name")
                    .and_then(|i| argv.get(i + 1))
                    .cloned()
                    .unwrap_or_default();
                let ws_label = argv
                    .iter()
                    .find(|a| a.starts_with("workspace-id="))
                    .map(|a| a.trim_start_matches("workspace-id=").to_string())
                    .unwrap_or_default();
                self.register_running(&id, &id, &[("workspace-id", &ws_label)]);
                self.register_running(&name, &id, &[("workspace-id", &ws_label)]);
                Ok(Self::ok(&format!("{id}\n")))
            }
            Some("start") | Some("stop") => Ok(Self::ok("")),
            Some("rm") => {
                let target = argv.last().unwrap().clone();
                self.inspectable.lock().unwrap().remove(&target);
                Ok(Self::ok(""))
            }
            Some("inspect") => {
                let target = argv.last().unwrap();
                match self.inspectable.lock().unwrap().get(target) {
                    Some(json) => Ok(Self::ok(json)),
                    None => Ok(Self::fail("Error: No such object")),
                }
            }
            Some("exec") => Ok(Self::ok("exec-output")),
            Some("ps") | Some("network") => Ok(Self::ok("")),
            _ => Ok(Self::ok("")),
        }
    }

    fn describe(&self) -> String {
        "mock".into()
    }
}

fn docker_workspace(store: &Store, name: &str) -> Workspace {
    let now = chrono::Utc::now().to_rfc3339();
    let ws = Workspace {
        id: WorkspaceId::new(),
        name: name.into(),
        description: String::new(),
        color: String::new(),
        status: WorkspaceStatus::Stopped,
        runtime: WorkspaceRuntime {
            runtime_type: RuntimeType::DockerLocal,
            docker_asset_id: None,
            container_mode: Some(ContainerMode::New),
            container_id: None,
            container_name: None,
            container_ip: None,
            new_container_image: Some("ubuntu:24.04".into()),
            new_container_name: Some(format!("choraleia-{name}")),
            work_dir_host: std::env::temp_dir()
                .join(format!("choraleia-test-{name}"))
                .to_string_lossy()
                .into_owned(),
            work_dir_container: Some("/workspace".into()),
        },
        asset_ids: vec![],
        tools: vec![],
        active_room_id: None,
        memory_enabled: false,
        created_at: now.clone(),
        updated_at: now,
    };
    store.insert_workspace(&ws).unwrap();
    ws
}

fn build(
    mock: Arc<MockDocker>,
) -> (Arc<RuntimeController>, Arc<Store>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let pool = Arc::new(SshPool::new(&SshDefaults::default()));
    let controller = Arc::new(
        RuntimeController::new(
            Arc::clone(&store),
            pool,
            DockerConfig::default(),
            Arc::new(RuntimeEvents::new()),
        )
        .with_runner(mock),
    );
    (controller, store)
}

async fn wait_for_status(store: &Store, id: &WorkspaceId, want: WorkspaceStatus) {
    for _ in 0..100 {
        if store.get_workspace(id).unwrap().status == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "workspace never reached {want}, is {}",
        store.get_workspace(id).unwrap().status
    );
}

#[tokio::test]
async fn concurrent_starts_create_exactly_one_container() {
    let mock = Arc::new(MockDocker::new());
    let (controller, store) = build(Arc::clone(&mock));
    let ws = docker_workspace(&store, "solo");

    let (a, b) = tokio::join!(controller.start(&ws.id), controller.start(&ws.id));
    a.unwrap();
    b.unwrap();

    wait_for_status(&store, &ws.id, WorkspaceStatus::Running).await;
    assert_eq!(mock.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn start_stop_start_yields_fresh_container_and_no_orphans() {
    let mock = Arc::new(MockDocker::new());
    let (controller, store) = build(Arc::clone(&mock));
    let ws = docker_workspace(&store, "cycle");

    controller.start(&ws.id).await.unwrap();
    wait_for_status(&store, &ws.id, WorkspaceStatus::Running).await;

    controller.stop(&ws.id, false).await.unwrap();
    wait_for_status(&store, &ws.id, WorkspaceStatus::Stopped).await;

    controller.start(&ws.id).await.unwrap();
    wait_for_status(&store, &ws.id, WorkspaceStatus::Running).await;

    assert_eq!(mock.creates.load(Ordering::SeqCst), 2);
    // The stop removed the first container (rm was issued).
    assert!(mock.calls().iter().any(|c| c.starts_with("docker rm")));
}

#[tokio::test]
async fn foreign_name_collision_mangles_instead_of_removing() {
    let mock = Arc::new(MockDocker::new());
    let (controller, store) = build(Arc::clone(&mock));
    let ws = docker_workspace(&store, "clash");

    // A container already holds the desired name, labeled for someone else.
    mock.register_running(
        "choraleia-clash",
        "foreign-id",
        &[("workspace-id", "someone-else")],
    );

    controller.start(&ws.id).await.unwrap();
    wait_for_status(&store, &ws.id, WorkspaceStatus::Running).await;

    // The foreign container was not removed, and our create used a suffix.
    assert!(!mock
        .calls()
        .iter()
        .any(|c| c == "docker rm -f choraleia-clash"));
    let create = mock
        .calls()
        .into_iter()
        .find(|c| c.starts_with("docker create"))
        .unwrap();
    assert!(create.contains("--name choraleia-clash-"));
}

#[tokio::test]
async fn own_label_collision_removes_the_stale_container() {
    let mock = Arc::new(MockDocker::new());
    let (controller, store) = build(Arc::clone(&mock));
    let ws = docker_workspace(&store, "stale");

    mock.register_running(
        "choraleia-stale",
        "stale-id",
        &[("workspace-id", ws.id.as_str())],
    );

    controller.start(&ws.id).await.unwrap();
    wait_for_status(&store, &ws.id, WorkspaceStatus::Running).await;

    assert!(mock
        .calls()
        .iter()
        .any(|c| c == "docker rm -f choraleia-stale"));
    let create = mock
        .calls()
        .into_iter()
        .find(|c| c.starts_with("docker create"))
        .unwrap();
    assert!(create.contains("--name choraleia-stale "));
}

#[tokio::test]
async fn exec_falls_back_to_persisted_container_name() {
    let mock = Arc::new(MockDocker::new());
    let (controller, store) = build(Arc::clone(&mock));
    let mut ws = docker_workspace(&store, "execfb");

    // Simulate a post-restart state: persisted name, no in-memory entry.
    ws.runtime.container_name = Some("choraleia-execfb".into());
    ws.runtime.container_id = Some("cid-old".into());
    store.set_workspace_runtime(&ws.id, &ws.runtime).unwrap();

    let out = controller
        .exec(&ws.id, &["echo".into(), "hi there".into()])
        .await
        .unwrap();
    assert_eq!(out, "exec-output");

    let exec_call = mock
        .calls()
        .into_iter()
        .find(|c| c.starts_with("docker exec"))
        .unwrap();
    assert!(exec_call.contains("choraleia-execfb"));
    assert!(exec_call.contains("echo 'hi there'"));
}
