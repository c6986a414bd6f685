//! System prompt composition: static role description, workspace block,
//! asset list, and the optional semantic-memory context.

use choraleia_core::types::{Asset, Workspace};

const ROLE_DESCRIPTION: &str = "You are a capable development assistant operating inside a user \
workspace. You can run shell commands in attached terminal sessions, read and write files, and \
drive a headless browser. Prefer taking actions through your tools over guessing; report command \
failures honestly and keep responses concise.";

/// Compose the full system prompt for a turn.
pub fn compose(
    workspace: &Workspace,
    assets: &[Asset],
    memory_context: Option<&str>,
) -> String {
    let mut prompt = String::from(ROLE_DESCRIPTION);

    prompt.push_str("\n\n## Workspace\n");
    prompt.push_str(&format!("Name: {}\n", workspace.name));
    if !workspace.description.is_empty() {
        prompt.push_str(&format!("Description: {}\n", workspace.description));
    }
    prompt.push_str(&format!("Status: {}\n", workspace.status));
    prompt.push_str(&format!(
        "Runtime: {:?}, workdir {}\n",
        workspace.runtime.runtime_type, workspace.runtime.work_dir_host
    ));
    if let Some(container) = &workspace.runtime.container_name {
        prompt.push_str(&format!("Container: {container}\n"));
    }

    if !assets.is_empty() {
        prompt.push_str("\n## Connected assets\n");
        for asset in assets {
            match &asset.ssh {
                Some(ssh) => prompt.push_str(&format!(
                    "- {} ({}): {}@{}:{}\n",
                    asset.name,
                    asset.kind.as_str(),
                    ssh.username,
                    ssh.host,
                    ssh.port
                )),
                None => prompt.push_str(&format!("- {} ({})\n", asset.name, asset.kind.as_str())),
            }
        }
    }

    if let Some(memory) = memory_context {
        prompt.push_str("\n## ");
        prompt.push_str(memory.trim_start());
        if !prompt.ends_with('\n') {
            prompt.push('\n');
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use choraleia_core::types::{
        RuntimeType, WorkspaceId, WorkspaceRuntime, WorkspaceStatus,
    };

    fn workspace() -> Workspace {
        let now = chrono::Utc::now().to_rfc3339();
        Workspace {
            id: WorkspaceId::new(),
            name: "dev".into(),
            description: "main dev box".into(),
            color: String::new(),
            status: WorkspaceStatus::Running,
            runtime: WorkspaceRuntime {
                runtime_type: RuntimeType::DockerLocal,
                docker_asset_id: None,
                container_mode: None,
                container_id: None,
                container_name: Some("choraleia-dev".into()),
                container_ip: None,
                new_container_image: None,
                new_container_name: None,
                work_dir_host: "~/work".into(),
                work_dir_container: Some("/workspace".into()),
            },
            asset_ids: vec![],
            tools: vec![],
            active_room_id: None,
            memory_enabled: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn prompt_includes_workspace_and_memory_blocks() {
        let prompt = compose(&workspace(), &[], Some("Relevant workspace memory:\n- k: v\n"));
        assert!(prompt.contains("## Workspace"));
        assert!(prompt.contains("Name: dev"));
        assert!(prompt.contains("Container: choraleia-dev"));
        assert!(prompt.contains("Relevant workspace memory"));
    }

    #[test]
    fn asset_block_lists_ssh_endpoints() {
        use choraleia_core::types::{Asset, AssetId, AssetKind, ConnectMode, SshEndpoint};
        let asset = Asset {
            id: AssetId::new(),
            name: "build-host".into(),
            kind: AssetKind::Ssh,
            ssh: Some(SshEndpoint {
                host: "10.0.0.5".into(),
                port: 22,
                username: "ci".into(),
                password: None,
                private_key: None,
                private_key_path: None,
                passphrase: None,
                connect: ConnectMode::Direct,
                tunnels: vec![],
            }),
            docker_host: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let prompt = compose(&workspace(), &[asset], None);
        assert!(prompt.contains("ci@10.0.0.5:22"));
    }
}
