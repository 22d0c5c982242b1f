//! Configuration loading, normalization, and validation.
//!
//! The TOML file accepts "string or table" forms for compose files,
//! mounts, and pre-shutdown commands; everything is normalized here
//! into the canonical shapes the rest of the daemon consumes, so no
//! other module ever sees the file-level variants. Legacy keys are
//! translated here too.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use upsguard_core::triggers::TriggerConfig;
use upsguard_notify::NotifyConfig;
use upsguard_shutdown::{
    ActionError, ComposeFile, ContainerStageConfig, FilesystemStageConfig, LocalShutdownConfig,
    MountEntry, PredefinedAction, PreShutdownCommand, PreShutdownKind, RemoteServer, RuntimeChoice,
    ShutdownConfig, UnmountConfig, VmStageConfig,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid configuration: {0}")]
    Action(#[from] ActionError),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

// ─── Normalized configuration ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct UpsConfig {
    /// `NAME@HOST` as understood by `upsc`.
    pub name: String,
    pub check_interval_s: u64,
    pub max_stale_tolerance: u32,
}

impl UpsConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilesConfig {
    pub state_file: PathBuf,
    pub shutdown_scheduled_file: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/var/run/ups-monitor.state"),
            shutdown_scheduled_file: PathBuf::from("/var/run/ups-shutdown-scheduled"),
        }
    }
}

/// The validated, canonical configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ups: UpsConfig,
    pub triggers: TriggerConfig,
    pub dry_run: bool,
    pub notifications: NotifyConfig,
    pub shutdown: ShutdownConfig,
    pub files: FilesConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        raw.normalize()
    }
}

// ─── Raw file forms ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    ups: RawUps,
    triggers: TriggerConfig,
    behavior: RawBehavior,
    notifications: RawNotifications,
    shutdown: RawShutdown,
    files: RawFiles,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawUps {
    name: String,
    check_interval_s: u64,
    max_stale_tolerance: u32,
}

impl Default for RawUps {
    fn default() -> Self {
        Self {
            name: "ups@localhost".to_string(),
            check_interval_s: 1,
            max_stale_tolerance: 3,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawBehavior {
    dry_run: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawNotifications {
    urls: Vec<String>,
    title: Option<String>,
    avatar_url: Option<String>,
    send_timeout_s: Option<u64>,
    retry_interval_s: Option<u64>,
    /// Legacy single-webhook key, translated into `urls`.
    discord_webhook: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawShutdown {
    virtual_machines: RawVmStage,
    containers: RawContainers,
    filesystems: RawFilesystems,
    remote_servers: Vec<RawRemoteServer>,
    local: RawLocal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawVmStage {
    enabled: Option<bool>,
    max_wait_s: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawContainers {
    enabled: Option<bool>,
    runtime: Option<RuntimeChoice>,
    stop_timeout_s: Option<u64>,
    compose_files: Vec<RawComposeEntry>,
    shutdown_all_remaining: Option<bool>,
    include_user_containers: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawComposeEntry {
    Path(String),
    Detailed {
        path: String,
        stop_timeout_s: Option<u64>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawFilesystems {
    enabled: Option<bool>,
    sync_enabled: Option<bool>,
    post_sync_delay_s: Option<u64>,
    unmount: RawUnmount,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawUnmount {
    timeout_s: Option<u64>,
    mounts: Vec<RawMountEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMountEntry {
    Path(String),
    Detailed {
        path: String,
        flags: Option<Vec<String>>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawRemoteServer {
    name: String,
    enabled: bool,
    host: String,
    user: String,
    connect_timeout_s: u64,
    command_timeout_s: u64,
    shutdown_command: String,
    ssh_options: Vec<String>,
    parallel: bool,
    pre_shutdown_commands: Vec<RawPreShutdown>,
}

impl Default for RawRemoteServer {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            host: String::new(),
            user: String::new(),
            connect_timeout_s: 10,
            command_timeout_s: 30,
            shutdown_command: "sudo shutdown -h now".to_string(),
            ssh_options: Vec::new(),
            parallel: true,
            pre_shutdown_commands: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPreShutdown {
    Command(String),
    Action {
        action: String,
        path: Option<String>,
        timeout_s: Option<u64>,
    },
    Custom {
        command: String,
        timeout_s: Option<u64>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawLocal {
    enabled: Option<bool>,
    command: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawFiles {
    state_file: PathBuf,
    shutdown_scheduled_file: PathBuf,
}

impl Default for RawFiles {
    fn default() -> Self {
        let defaults = FilesConfig::default();
        Self {
            state_file: defaults.state_file,
            shutdown_scheduled_file: defaults.shutdown_scheduled_file,
        }
    }
}

// ─── Normalization ────────────────────────────────────────────────

impl RawConfig {
    fn normalize(self) -> Result<Config, ConfigError> {
        if self.ups.name.trim().is_empty() {
            return Err(invalid("ups.name must not be empty"));
        }
        if self.ups.check_interval_s == 0 {
            return Err(invalid("ups.check_interval_s must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.triggers.low_battery_percent) {
            return Err(invalid("triggers.low_battery_percent must be within 0-100"));
        }
        if self.triggers.depletion.min_samples < 2 {
            return Err(invalid("triggers.depletion.min_samples must be at least 2"));
        }
        if self.triggers.depletion.critical_rate_pct_per_min <= 0.0 {
            return Err(invalid(
                "triggers.depletion.critical_rate_pct_per_min must be positive",
            ));
        }

        let notifications = normalize_notifications(self.notifications)?;
        let shutdown = self.shutdown.normalize()?;

        Ok(Config {
            ups: UpsConfig {
                name: self.ups.name,
                check_interval_s: self.ups.check_interval_s,
                max_stale_tolerance: self.ups.max_stale_tolerance,
            },
            triggers: self.triggers,
            dry_run: self.behavior.dry_run,
            notifications,
            shutdown,
            files: FilesConfig {
                state_file: self.files.state_file,
                shutdown_scheduled_file: self.files.shutdown_scheduled_file,
            },
        })
    }
}

fn normalize_notifications(raw: RawNotifications) -> Result<NotifyConfig, ConfigError> {
    let defaults = NotifyConfig::default();
    let mut urls = raw.urls;

    if let Some(webhook) = raw.discord_webhook {
        if !urls.is_empty() {
            return Err(invalid(
                "notifications.discord_webhook and notifications.urls are mutually exclusive; \
                 move the webhook into urls",
            ));
        }
        urls.push(translate_discord_webhook(&webhook)?);
    }

    let send_timeout_s = raw.send_timeout_s.unwrap_or(defaults.send_timeout_s);
    let retry_interval_s = raw.retry_interval_s.unwrap_or(defaults.retry_interval_s);
    if send_timeout_s == 0 {
        return Err(invalid("notifications.send_timeout_s must be at least 1"));
    }
    if retry_interval_s == 0 {
        return Err(invalid("notifications.retry_interval_s must be at least 1"));
    }

    Ok(NotifyConfig {
        urls,
        title: raw.title,
        avatar_url: raw.avatar_url,
        send_timeout_s,
        retry_interval_s,
    })
}

/// Translate the legacy `https://discord.com/api/webhooks/ID/TOKEN`
/// form into the sink URL scheme.
fn translate_discord_webhook(webhook: &str) -> Result<String, ConfigError> {
    let rest = webhook
        .strip_prefix("https://discord.com/api/webhooks/")
        .or_else(|| webhook.strip_prefix("https://discordapp.com/api/webhooks/"))
        .ok_or_else(|| {
            invalid(format!(
                "notifications.discord_webhook is not a Discord webhook URL: {webhook}"
            ))
        })?;
    match rest.trim_end_matches('/').split_once('/') {
        Some((id, token)) if !id.is_empty() && !token.is_empty() && !token.contains('/') => {
            Ok(format!("discord://{id}/{token}"))
        }
        _ => Err(invalid(format!(
            "notifications.discord_webhook is missing its id/token: {webhook}"
        ))),
    }
}

impl RawShutdown {
    fn normalize(self) -> Result<ShutdownConfig, ConfigError> {
        let vm_defaults = VmStageConfig::default();
        let container_defaults = ContainerStageConfig::default();
        let fs_defaults = FilesystemStageConfig::default();
        let unmount_defaults = UnmountConfig::default();
        let local_defaults = LocalShutdownConfig::default();

        let remote_servers = self
            .remote_servers
            .into_iter()
            .map(normalize_remote_server)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ShutdownConfig {
            virtual_machines: VmStageConfig {
                enabled: self.virtual_machines.enabled.unwrap_or(vm_defaults.enabled),
                max_wait_s: self
                    .virtual_machines
                    .max_wait_s
                    .unwrap_or(vm_defaults.max_wait_s),
            },
            containers: ContainerStageConfig {
                enabled: self.containers.enabled.unwrap_or(container_defaults.enabled),
                runtime: self.containers.runtime.unwrap_or(container_defaults.runtime),
                stop_timeout_s: self
                    .containers
                    .stop_timeout_s
                    .unwrap_or(container_defaults.stop_timeout_s),
                compose_files: self
                    .containers
                    .compose_files
                    .into_iter()
                    .map(|entry| match entry {
                        RawComposeEntry::Path(path) => ComposeFile {
                            path: path.into(),
                            stop_timeout_s: None,
                        },
                        RawComposeEntry::Detailed {
                            path,
                            stop_timeout_s,
                        } => ComposeFile {
                            path: path.into(),
                            stop_timeout_s,
                        },
                    })
                    .collect(),
                shutdown_all_remaining: self
                    .containers
                    .shutdown_all_remaining
                    .unwrap_or(container_defaults.shutdown_all_remaining),
                include_user_containers: self
                    .containers
                    .include_user_containers
                    .unwrap_or(container_defaults.include_user_containers),
            },
            filesystems: FilesystemStageConfig {
                enabled: self.filesystems.enabled.unwrap_or(fs_defaults.enabled),
                sync_enabled: self
                    .filesystems
                    .sync_enabled
                    .unwrap_or(fs_defaults.sync_enabled),
                post_sync_delay_s: self
                    .filesystems
                    .post_sync_delay_s
                    .unwrap_or(fs_defaults.post_sync_delay_s),
                unmount: UnmountConfig {
                    timeout_s: self
                        .filesystems
                        .unmount
                        .timeout_s
                        .unwrap_or(unmount_defaults.timeout_s),
                    mounts: self
                        .filesystems
                        .unmount
                        .mounts
                        .into_iter()
                        .map(|entry| match entry {
                            RawMountEntry::Path(path) => MountEntry {
                                path: path.into(),
                                flags: Vec::new(),
                            },
                            RawMountEntry::Detailed { path, flags } => MountEntry {
                                path: path.into(),
                                flags: flags.unwrap_or_default(),
                            },
                        })
                        .collect(),
                },
            },
            remote_servers,
            local: LocalShutdownConfig {
                enabled: self.local.enabled.unwrap_or(local_defaults.enabled),
                command: self.local.command.unwrap_or(local_defaults.command),
                message: self.local.message,
            },
        })
    }
}

fn normalize_remote_server(raw: RawRemoteServer) -> Result<RemoteServer, ConfigError> {
    if raw.name.trim().is_empty() {
        return Err(invalid("remote server entry is missing a name"));
    }
    if raw.host.trim().is_empty() {
        return Err(invalid(format!("remote server {} is missing a host", raw.name)));
    }
    if raw.user.trim().is_empty() {
        return Err(invalid(format!("remote server {} is missing a user", raw.name)));
    }

    let pre_shutdown_commands = raw
        .pre_shutdown_commands
        .into_iter()
        .map(|entry| {
            Ok(match entry {
                RawPreShutdown::Command(command) => PreShutdownCommand {
                    kind: PreShutdownKind::Custom(command),
                    timeout_s: None,
                },
                RawPreShutdown::Custom { command, timeout_s } => PreShutdownCommand {
                    kind: PreShutdownKind::Custom(command),
                    timeout_s,
                },
                RawPreShutdown::Action {
                    action,
                    path,
                    timeout_s,
                } => PreShutdownCommand {
                    kind: PreShutdownKind::Action(PredefinedAction::from_name(
                        &action,
                        path.as_deref(),
                    )?),
                    timeout_s,
                },
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(RemoteServer {
        name: raw.name,
        enabled: raw.enabled,
        host: raw.host,
        user: raw.user,
        connect_timeout_s: raw.connect_timeout_s,
        command_timeout_s: raw.command_timeout_s,
        shutdown_command: raw.shutdown_command,
        ssh_options: raw.ssh_options,
        parallel: raw.parallel,
        pre_shutdown_commands,
    })
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = Config::from_toml_str("").expect("defaults parse");
        assert_eq!(cfg.ups.name, "ups@localhost");
        assert_eq!(cfg.ups.check_interval_s, 1);
        assert_eq!(cfg.ups.max_stale_tolerance, 3);
        assert!(!cfg.dry_run);
        assert_eq!(cfg.triggers.low_battery_percent, 20.0);
        assert!(cfg.shutdown.virtual_machines.enabled);
        assert_eq!(cfg.shutdown.local.command, "shutdown -h now");
        assert_eq!(cfg.files.state_file, PathBuf::from("/var/run/ups-monitor.state"));
    }

    #[test]
    fn full_file_parses() {
        let cfg = Config::from_toml_str(
            r#"
[ups]
name = "apc1500@nut.lan"
check_interval_s = 2
max_stale_tolerance = 5

[triggers]
low_battery_percent = 25.0
critical_runtime_s = 900

[triggers.depletion]
window_s = 240
critical_rate_pct_per_min = 12.5
grace_s = 60
min_samples = 20

[triggers.extended_time]
enabled = false
threshold_s = 1200

[behavior]
dry_run = true

[notifications]
urls = ["discord://id/token", "mailto://ops@example.com"]
title = "UPS"
send_timeout_s = 15
retry_interval_s = 7

[shutdown.virtual_machines]
enabled = false

[shutdown.containers]
runtime = "podman"
stop_timeout_s = 90
compose_files = [
    "/srv/app/docker-compose.yml",
    { path = "/srv/db/docker-compose.yml", stop_timeout_s = 120 },
]
include_user_containers = true

[shutdown.filesystems]
post_sync_delay_s = 4

[shutdown.filesystems.unmount]
timeout_s = 20
mounts = ["/mnt/fast", { path = "/mnt/nfs", flags = ["-l", "-f"] }]

[[shutdown.remote_servers]]
name = "hypervisor"
host = "hv.lan"
user = "root"
parallel = false
pre_shutdown_commands = [
    "echo draining",
    { action = "stop_vms", timeout_s = 120 },
    { action = "stop_compose", path = "/srv/dc.yml" },
    { command = "systemctl stop backup.service", timeout_s = 20 },
]

[[shutdown.remote_servers]]
name = "nas"
host = "nas.lan"
user = "admin"

[shutdown.local]
command = "systemctl poweroff"
message = "UPS critical"

[files]
state_file = "/tmp/ups.state"
shutdown_scheduled_file = "/tmp/ups.sched"
"#,
        )
        .expect("full config parses");

        assert_eq!(cfg.ups.name, "apc1500@nut.lan");
        assert!(cfg.dry_run);
        assert!(!cfg.triggers.extended_time.enabled);
        assert_eq!(cfg.notifications.urls.len(), 2);
        assert_eq!(cfg.notifications.send_timeout_s, 15);

        assert!(!cfg.shutdown.virtual_machines.enabled);
        assert_eq!(cfg.shutdown.containers.runtime, RuntimeChoice::Podman);
        assert_eq!(cfg.shutdown.containers.compose_files.len(), 2);
        assert_eq!(cfg.shutdown.containers.compose_files[0].stop_timeout_s, None);
        assert_eq!(
            cfg.shutdown.containers.compose_files[1].stop_timeout_s,
            Some(120)
        );
        assert!(cfg.shutdown.containers.include_user_containers);

        assert_eq!(cfg.shutdown.filesystems.post_sync_delay_s, 4);
        let mounts = &cfg.shutdown.filesystems.unmount.mounts;
        assert_eq!(mounts[0].flags, Vec::<String>::new());
        assert_eq!(mounts[1].flags, vec!["-l", "-f"]);

        let hv = &cfg.shutdown.remote_servers[0];
        assert!(!hv.parallel);
        assert_eq!(hv.pre_shutdown_commands.len(), 4);
        assert!(matches!(
            &hv.pre_shutdown_commands[0].kind,
            PreShutdownKind::Custom(c) if c == "echo draining"
        ));
        assert!(matches!(
            &hv.pre_shutdown_commands[1].kind,
            PreShutdownKind::Action(PredefinedAction::StopVms)
        ));
        assert_eq!(hv.pre_shutdown_commands[1].timeout_s, Some(120));
        assert!(matches!(
            &hv.pre_shutdown_commands[2].kind,
            PreShutdownKind::Action(PredefinedAction::StopCompose { path }) if path == "/srv/dc.yml"
        ));
        assert!(matches!(
            &hv.pre_shutdown_commands[3].kind,
            PreShutdownKind::Custom(c) if c == "systemctl stop backup.service"
        ));

        let nas = &cfg.shutdown.remote_servers[1];
        assert!(nas.parallel);
        assert_eq!(nas.shutdown_command, "sudo shutdown -h now");
        assert_eq!(nas.connect_timeout_s, 10);

        assert_eq!(cfg.shutdown.local.message.as_deref(), Some("UPS critical"));
        assert_eq!(cfg.files.state_file, PathBuf::from("/tmp/ups.state"));
    }

    // ── Validation failures ─────────────────────────────────────

    #[test]
    fn empty_ups_name_rejected() {
        let err = Config::from_toml_str("[ups]\nname = \"\"\n").expect_err("must fail");
        assert!(err.to_string().contains("ups.name"));
    }

    #[test]
    fn zero_check_interval_rejected() {
        let err =
            Config::from_toml_str("[ups]\ncheck_interval_s = 0\n").expect_err("must fail");
        assert!(err.to_string().contains("check_interval_s"));
    }

    #[test]
    fn out_of_range_low_battery_rejected() {
        let err = Config::from_toml_str("[triggers]\nlow_battery_percent = 140.0\n")
            .expect_err("must fail");
        assert!(err.to_string().contains("low_battery_percent"));
    }

    #[test]
    fn unknown_key_rejected() {
        let err = Config::from_toml_str("[ups]\nnom = \"typo\"\n").expect_err("must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn remote_server_without_host_rejected() {
        let err = Config::from_toml_str(
            "[[shutdown.remote_servers]]\nname = \"nas\"\nuser = \"admin\"\n",
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("missing a host"));
    }

    #[test]
    fn unknown_predefined_action_rejected() {
        let err = Config::from_toml_str(
            r#"
[[shutdown.remote_servers]]
name = "nas"
host = "nas.lan"
user = "admin"
pre_shutdown_commands = [{ action = "stop_everything" }]
"#,
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("stop_everything"));
    }

    #[test]
    fn stop_compose_without_path_rejected() {
        let err = Config::from_toml_str(
            r#"
[[shutdown.remote_servers]]
name = "nas"
host = "nas.lan"
user = "admin"
pre_shutdown_commands = [{ action = "stop_compose" }]
"#,
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("requires a path"));
    }

    // ── Legacy webhook translation ──────────────────────────────

    #[test]
    fn legacy_webhook_translates_to_url_list() {
        let cfg = Config::from_toml_str(
            "[notifications]\ndiscord_webhook = \"https://discord.com/api/webhooks/123/abcTOKEN\"\n",
        )
        .expect("legacy key accepted");
        assert_eq!(cfg.notifications.urls, vec!["discord://123/abcTOKEN"]);
    }

    #[test]
    fn legacy_webhook_with_urls_rejected() {
        let err = Config::from_toml_str(
            "[notifications]\nurls = [\"mailto://a@b\"]\ndiscord_webhook = \"https://discord.com/api/webhooks/1/t\"\n",
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn malformed_webhook_rejected() {
        let err = Config::from_toml_str(
            "[notifications]\ndiscord_webhook = \"https://example.com/hook\"\n",
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("not a Discord webhook"));
    }

    #[test]
    fn webhook_without_token_rejected() {
        let err = Config::from_toml_str(
            "[notifications]\ndiscord_webhook = \"https://discord.com/api/webhooks/123\"\n",
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("id/token"));
    }
}
