use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Everything `docker create` needs for a workspace or browser container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub labels: Vec<(String, String)>,
    /// host-path:container-path bind mounts.
    pub binds: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    /// e.g. "2g"; empty disables.
    pub memory_limit: String,
    /// e.g. "2"; empty disables.
    pub cpu_limit: String,
    /// e.g. "512m"; empty disables.
    pub shm_size: String,
    pub network: Option<String>,
    /// Keep the container alive with a no-op entrypoint when the image has
    /// none (`sleep infinity`).
    pub command: Vec<String>,
}

impl ContainerSpec {
    /// Render the full `docker create` argv.
    pub fn to_create_argv(&self) -> Vec<String> {
        let mut argv: Vec<String> = vec!["docker".into(), "create".into()];
        argv.push("--name".into());
        argv.push(self.name.clone());
        for (k, v) in &self.labels {
            argv.push("--label".into());
            argv.push(format!("{k}={v}"));
        }
        for (host, cont) in &self.binds {
            argv.push("-v".into());
            argv.push(format!("{host}:{cont}"));
        }
        for (k, v) in &self.env {
            argv.push("-e".into());
            argv.push(format!("{k}={v}"));
        }
        if !self.memory_limit.is_empty() {
            argv.push("--memory".into());
            argv.push(self.memory_limit.clone());
        }
        if !self.cpu_limit.is_empty() {
            argv.push("--cpus".into());
            argv.push(self.cpu_limit.clone());
        }
        if !self.shm_size.is_empty() {
            argv.push("--shm-size".into());
            argv.push(self.shm_size.clone());
        }
        if let Some(network) = &self.network {
            argv.push("--network".into());
            argv.push(network.clone());
        }
        argv.push(self.image.clone());
        argv.extend(self.command.iter().cloned());
        argv
    }
}

/// Subset of `docker inspect` this system cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub labels: HashMap<String, String>,
    /// Network name -> IP address.
    pub networks: HashMap<String, String>,
}

impl ContainerInfo {
    /// IP on `network` when named, otherwise the first network that has one.
    pub fn ip_on(&self, network: Option<&str>) -> Option<String> {
        match network {
            Some(net) => self.networks.get(net).filter(|ip| !ip.is_empty()).cloned(),
            None => self
                .networks
                .values()
                .find(|ip| !ip.is_empty())
                .cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_argv_includes_limits_and_labels() {
        let spec = ContainerSpec {
            image: "ubuntu:24.04".into(),
            name: "ws-dev".into(),
            labels: vec![("managed-by".into(), "choraleia".into())],
            binds: vec![("/home/u/work".into(), "/workspace".into())],
            env: vec![],
            memory_limit: "2g".into(),
            cpu_limit: "2".into(),
            shm_size: "512m".into(),
            network: None,
            command: vec!["sleep".into(), "infinity".into()],
        };
        let argv = spec.to_create_argv();
        let joined = argv.join(" ");
        assert!(joined.starts_with("docker create --name ws-dev"));
        assert!(joined.contains("--label managed-by=choraleia"));
        assert!(joined.contains("-v /home/u/work:/workspace"));
        assert!(joined.contains("--memory 2g"));
        assert!(joined.contains("--cpus 2"));
        assert!(joined.contains("--shm-size 512m"));
        assert!(joined.ends_with("ubuntu:24.04 sleep infinity"));
    }

    #[test]
    fn ip_on_prefers_named_network() {
        let mut networks = HashMap::new();
        networks.insert("bridge".to_string(), "172.17.0.2".to_string());
        networks.insert("choraleia-browser-net".to_string(), "172.20.0.3".to_string());
        let info = ContainerInfo {
            id: "abc".into(),
            name: "b".into(),
            running: true,
            labels: HashMap::new(),
            networks,
        };
        assert_eq!(
            info.ip_on(Some("choraleia-browser-net")).unwrap(),
            "172.20.0.3"
        );
        assert!(info.ip_on(Some("missing")).is_none());
        assert!(info.ip_on(None).is_some());
    }
}
