// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime strategies.
//!
//! A [`RuntimeStrategy`] supplies the per-runtime defaults an experiment
//! manifest may leave out: container port, mount layout, start command,
//! environment, and health probe. Strategies are looked up by type key via
//! [`ProviderRegistry`](crate::registry::ProviderRegistry); `java` is the
//! documented fallback.

use std::collections::BTreeMap;
use std::path::Path;

use crate::manifest::{HealthProbe, VolumeMount};

/// Per-runtime defaults and command assembly.
pub trait RuntimeStrategy: Send + Sync {
    /// Type key this strategy serves, e.g. `java`.
    fn type_key(&self) -> &'static str;

    /// Port the default workload listens on inside the container.
    fn default_container_port(&self) -> u16;

    /// Where the program volume is mounted inside the container.
    fn default_mount_path(&self) -> &'static str;

    /// Mount options for the program volume, e.g. `:ro`. Empty means
    /// writable, which runtimes installing dependencies at start need.
    fn default_mount_options(&self) -> &'static str {
        ""
    }

    /// Start command used when the manifest declares none.
    fn default_start_command(&self) -> Option<String>;

    /// Assembles the effective start command: picks the manifest command over
    /// the default, substitutes `${VAR}` placeholders, and wraps the result
    /// in `sh -c "..."` so the variables resolve inside the container shell.
    fn build_start_command(
        &self,
        custom: Option<&str>,
        vars: &BTreeMap<String, String>,
    ) -> Option<String> {
        let chosen = custom
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_start_command())?;
        let mut command = chosen;
        for (key, value) in vars {
            command = command.replace(&format!("${{{key}}}"), value);
        }
        Some(format!("sh -c \"{}\"", command.replace('"', "\\\"")))
    }

    /// Runtime-specific environment variables for the primary service.
    fn default_environment(
        &self,
        host_port: u16,
        container_port: u16,
    ) -> BTreeMap<String, String>;

    /// Health probe used when the manifest declares none. `None` means the
    /// runtime has nothing probeable and health waiting must be skipped.
    fn default_health_check(&self, container_port: u16) -> Option<HealthProbe> {
        Some(HealthProbe {
            test: vec![
                "CMD".to_string(),
                "curl".to_string(),
                "-f".to_string(),
                format!("http://localhost:{container_port}/health"),
            ],
            ..HealthProbe::default()
        })
    }

    /// Volume mounts used when the manifest declares none.
    fn default_volumes(&self, program_path: &Path) -> Vec<VolumeMount> {
        vec![VolumeMount {
            host_path: program_path.display().to_string(),
            container_path: self.default_mount_path().to_string(),
            options: self.default_mount_options().to_string(),
        }]
    }

    /// Whether the service gets a pseudo-TTY.
    fn enable_tty(&self) -> bool {
        false
    }

    /// Whether stdin stays open.
    fn enable_stdin_open(&self) -> bool {
        false
    }

    /// Working directory override for the primary service.
    fn working_directory(&self) -> Option<&'static str> {
        None
    }
}

/// JVM applications packaged as a runnable jar. The registry fallback.
pub struct JavaRuntime;

impl RuntimeStrategy for JavaRuntime {
    fn type_key(&self) -> &'static str {
        "java"
    }

    fn default_container_port(&self) -> u16 {
        8080
    }

    fn default_mount_path(&self) -> &'static str {
        "/app/program"
    }

    fn default_start_command(&self) -> Option<String> {
        Some("java -jar /app/program/app.jar".to_string())
    }

    fn default_environment(
        &self,
        host_port: u16,
        container_port: u16,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("APP_PORT".to_string(), host_port.to_string()),
            ("CONTAINER_PORT".to_string(), container_port.to_string()),
        ])
    }
}

/// Interactive Python workspaces. No exposed service: the container idles on
/// a keep-alive command and users attach to it, so there is nothing to probe.
pub struct PythonRuntime;

const PYTHON_WORK_DIR: &str = "/app/program";
const PYTHON_KEEP_ALIVE: &str = "sh -c \"tail -f /dev/null\"";

impl RuntimeStrategy for PythonRuntime {
    fn type_key(&self) -> &'static str {
        "python"
    }

    fn default_container_port(&self) -> u16 {
        8000
    }

    fn default_mount_path(&self) -> &'static str {
        PYTHON_WORK_DIR
    }

    fn default_start_command(&self) -> Option<String> {
        Some(PYTHON_KEEP_ALIVE.to_string())
    }

    fn build_start_command(
        &self,
        _custom: Option<&str>,
        _vars: &BTreeMap<String, String>,
    ) -> Option<String> {
        // The workspace must stay alive regardless of what the manifest says.
        Some(PYTHON_KEEP_ALIVE.to_string())
    }

    fn default_environment(
        &self,
        host_port: u16,
        _container_port: u16,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ("WORKDIR".to_string(), PYTHON_WORK_DIR.to_string()),
            ("APP_PORT".to_string(), host_port.to_string()),
        ])
    }

    fn default_health_check(&self, _container_port: u16) -> Option<HealthProbe> {
        None
    }

    fn enable_tty(&self) -> bool {
        true
    }

    fn enable_stdin_open(&self) -> bool {
        true
    }

    fn working_directory(&self) -> Option<&'static str> {
        Some(PYTHON_WORK_DIR)
    }
}

/// Node.js applications installing their dependencies at start.
pub struct NodeRuntime;

impl RuntimeStrategy for NodeRuntime {
    fn type_key(&self) -> &'static str {
        "node"
    }

    fn default_container_port(&self) -> u16 {
        3000
    }

    fn default_mount_path(&self) -> &'static str {
        "/app/program"
    }

    fn default_start_command(&self) -> Option<String> {
        Some("cd /app/program && npm install --production && node server.js".to_string())
    }

    fn default_environment(
        &self,
        host_port: u16,
        container_port: u16,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("APP_PORT".to_string(), host_port.to_string()),
            ("CONTAINER_PORT".to_string(), container_port.to_string()),
            ("NODE_ENV".to_string(), "production".to_string()),
        ])
    }
}

/// Static sites served read-only by nginx. Also registered for the legacy
/// `docker` type key.
pub struct NginxRuntime;

impl RuntimeStrategy for NginxRuntime {
    fn type_key(&self) -> &'static str {
        "nginx"
    }

    fn default_container_port(&self) -> u16 {
        80
    }

    fn default_mount_path(&self) -> &'static str {
        "/usr/share/nginx/html"
    }

    fn default_mount_options(&self) -> &'static str {
        ":ro"
    }

    fn default_start_command(&self) -> Option<String> {
        Some("nginx -g 'daemon off;'".to_string())
    }

    fn default_environment(
        &self,
        _host_port: u16,
        _container_port: u16,
    ) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn default_health_check(&self, _container_port: u16) -> Option<HealthProbe> {
        Some(HealthProbe {
            test: vec![
                "CMD".to_string(),
                "wget".to_string(),
                "--quiet".to_string(),
                "--tries=1".to_string(),
                "--spider".to_string(),
                "http://localhost/".to_string(),
            ],
            start_period: "10s".to_string(),
            ..HealthProbe::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_variables_and_wraps_in_shell() {
        let vars = BTreeMap::from([
            ("APP_PORT".to_string(), "18005".to_string()),
            ("EXP_ID".to_string(), "exp1".to_string()),
        ]);
        let cmd = JavaRuntime
            .build_start_command(Some("serve --port ${APP_PORT} --id ${EXP_ID}"), &vars)
            .unwrap();
        assert_eq!(cmd, "sh -c \"serve --port 18005 --id exp1\"");
    }

    #[test]
    fn escapes_embedded_quotes() {
        let cmd = JavaRuntime
            .build_start_command(Some(r#"echo "hello""#), &BTreeMap::new())
            .unwrap();
        assert_eq!(cmd, r#"sh -c "echo \"hello\"""#);
    }

    #[test]
    fn blank_custom_command_falls_back_to_default() {
        let cmd = JavaRuntime
            .build_start_command(Some("   "), &BTreeMap::new())
            .unwrap();
        assert!(cmd.contains("java -jar /app/program/app.jar"));
    }

    #[test]
    fn python_ignores_custom_commands() {
        let cmd = PythonRuntime
            .build_start_command(Some("python server.py"), &BTreeMap::new())
            .unwrap();
        assert_eq!(cmd, PYTHON_KEEP_ALIVE);
        assert!(PythonRuntime.default_health_check(8000).is_none());
    }

    #[test]
    fn nginx_mounts_read_only_with_spider_probe() {
        let volumes = NginxRuntime.default_volumes(Path::new("/opt/apps/site"));
        assert_eq!(volumes[0].render(), "/opt/apps/site:/usr/share/nginx/html:ro");
        let probe = NginxRuntime.default_health_check(80).unwrap();
        assert_eq!(probe.start_period, "10s");
        assert!(probe.test.contains(&"--spider".to_string()));
    }
}
