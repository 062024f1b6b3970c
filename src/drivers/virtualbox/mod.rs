//! VirtualBox driver.
//!
//! Provisions a boot2docker guest through `VBoxManage`:
//! - the boot ISO comes from a shared cache ([`iso`]);
//! - the data disk is synthesized from a tar payload carrying the host's SSH
//!   key ([`crate::disk`]);
//! - NIC 1 is NAT with an SSH port forward, NIC 2 sits on a shared host-only
//!   network ([`hostonly`]).
//!
//! The driver keeps no runtime state. Every query asks VirtualBox, and the
//! SSH port is read back from the machine's NAT forwarding rule.

pub mod hostonly;
pub mod iso;
pub mod vbm;

use self::hostonly::{get_or_create_host_only_network, HostOnlyConfig};
use self::iso::BootImageCache;
use self::vbm::{
    check_machine_output, parse_ssh_forward_port, parse_vm_state, VBoxManage, VBoxManageCommand,
};
use super::{check_known_options, Driver, DriverOptions, FlagSpec};
use crate::config::Settings;
use crate::disk::{self, DEFAULT_DISK_SIZE_MB};
use crate::error::{Error, Result};
use crate::probe::{self, HttpProbe, ReqwestProbe, RetryPolicy};
use crate::ssh::{self, SshRunner, SystemSsh};
use crate::state::State;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// Port the guest's container daemon listens on.
pub const DOCKER_PORT: u16 = 2375;

/// Default guest memory in MiB.
pub const DEFAULT_MEMORY_MB: u32 = 1024;

/// Upper bound on virtual CPUs.
const MAX_CPUS: usize = 32;

/// Guest login user.
const SSH_USER: &str = "docker";

/// Storage controller name.
const STORAGE_CONTROLLER: &str = "SATA";

const MACHINE_NAME_OPTION: &str = "machine-name";
const MEMORY_OPTION: &str = "memory";
const DISK_SIZE_OPTION: &str = "disk-size";

/// Typed driver configuration. This is what gets persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualBoxConfig {
    /// VirtualBox machine name; assigned on create if unset.
    pub machine_name: Option<String>,
    /// Guest memory in MiB.
    pub memory_mb: u32,
    /// Data disk size in MiB.
    pub disk_size_mb: u64,
}

impl Default for VirtualBoxConfig {
    fn default() -> Self {
        Self {
            machine_name: None,
            memory_mb: DEFAULT_MEMORY_MB,
            disk_size_mb: DEFAULT_DISK_SIZE_MB,
        }
    }
}

/// Wait bounds used by start and stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Delay between state polls while waiting for ACPI shutdown.
    pub stop_poll: Duration,
    /// Bound on waiting for the SSH port after boot.
    pub ssh: RetryPolicy,
    /// Bound on each round of waiting for the daemon.
    pub docker: RetryPolicy,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            stop_poll: Duration::from_secs(1),
            ssh: RetryPolicy::new(60, Duration::from_secs(2)),
            docker: RetryPolicy::DOCKER,
        }
    }
}

impl Timings {
    /// Timings from the global settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            stop_poll: settings.stop_poll_interval,
            ssh: RetryPolicy::new(settings.ssh_wait_attempts, settings.ssh_wait_interval),
            docker: RetryPolicy::new(settings.docker_wait_attempts, settings.docker_wait_interval),
        }
    }
}

/// Driver for a local VirtualBox machine.
pub struct VirtualBoxDriver {
    config: VirtualBoxConfig,
    store_path: PathBuf,
    boot_image: BootImageCache,
    network: HostOnlyConfig,
    vbm: Arc<dyn VBoxManage>,
    http: Option<Arc<dyn HttpProbe + Send + Sync>>,
    ssh: Arc<dyn SshRunner>,
    timings: Timings,
    /// Port allocated by `create` in this process; otherwise read back from
    /// VirtualBox.
    ssh_port: Option<u16>,
}

impl std::fmt::Debug for VirtualBoxDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualBoxDriver")
            .field("config", &self.config)
            .field("store_path", &self.store_path)
            .field("boot_image", &self.boot_image)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl VirtualBoxDriver {
    /// Options accepted at creation time.
    pub const CREATE_FLAGS: &'static [FlagSpec] = &[
        FlagSpec {
            option: MACHINE_NAME_OPTION,
            help: "VirtualBox machine name (default: generated)",
        },
        FlagSpec {
            option: MEMORY_OPTION,
            help: "Guest memory in MB (default: 1024)",
        },
        FlagSpec {
            option: DISK_SIZE_OPTION,
            help: "Data disk size in MB (default: 20000)",
        },
    ];

    /// Create a driver for the host directory `store_path`.
    pub fn new(store_path: &Path, settings: &Settings) -> Self {
        Self {
            config: VirtualBoxConfig::default(),
            store_path: store_path.to_path_buf(),
            boot_image: BootImageCache::from_settings(settings),
            network: HostOnlyConfig::default(),
            vbm: Arc::new(VBoxManageCommand::new(settings.vbox_manage.clone())),
            http: None,
            ssh: Arc::new(SystemSsh),
            timings: Timings::from_settings(settings),
            ssh_port: None,
        }
    }

    /// Use a different VBoxManage gateway.
    pub fn with_vbm(mut self, vbm: Arc<dyn VBoxManage>) -> Self {
        self.vbm = vbm;
        self
    }

    /// Use a different HTTP probe for daemon readiness.
    pub fn with_http_probe(mut self, probe: Arc<dyn HttpProbe + Send + Sync>) -> Self {
        self.http = Some(probe);
        self
    }

    /// Use a different runner for commands executed on the guest.
    pub fn with_ssh_runner(mut self, ssh: Arc<dyn SshRunner>) -> Self {
        self.ssh = ssh;
        self
    }

    /// Override wait bounds.
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Typed configuration.
    pub fn config(&self) -> &VirtualBoxConfig {
        &self.config
    }

    /// Machine name, if assigned.
    pub fn machine_name(&self) -> Option<&str> {
        self.config.machine_name.as_deref()
    }

    fn require_machine_name(&self) -> Result<&str> {
        self.machine_name()
            .ok_or_else(|| Error::MachineNotExist("(unnamed machine)".into()))
    }

    fn ssh_key_path(&self) -> PathBuf {
        self.store_path.join("id_rsa")
    }

    fn disk_path(&self) -> PathBuf {
        self.store_path.join("disk.vmdk")
    }

    fn machine_info(&self) -> Result<String> {
        let name = self.require_machine_name()?;
        let output = self
            .vbm
            .output_err(&["showvminfo", name, "--machinereadable"])?;
        check_machine_output(name, "showvminfo", output)
    }

    fn ssh_port(&self) -> Result<u16> {
        if let Some(port) = self.ssh_port {
            return Ok(port);
        }
        let info = self.machine_info()?;
        parse_ssh_forward_port(&info).ok_or_else(|| {
            Error::command_failed(
                "VBoxManage showvminfo",
                format!(
                    "machine {} has no ssh port forwarding rule",
                    self.machine_name().unwrap_or_default()
                ),
            )
        })
    }

    fn ssh_command(&self, args: &[&str]) -> Result<Command> {
        let port = self.ssh_port()?;
        Ok(ssh::ssh_command(
            "localhost",
            port,
            SSH_USER,
            &self.ssh_key_path(),
            args,
        ))
    }

    fn restart_daemon(&self) -> Result<()> {
        let cmd = self.ssh_command(&["sudo /etc/init.d/docker restart"])?;
        self.ssh.output(cmd).map(|_| ())
    }

    fn http_probe(&self) -> Result<Arc<dyn HttpProbe + Send + Sync>> {
        match &self.http {
            Some(probe) => Ok(Arc::clone(probe)),
            None => Ok(Arc::new(ReqwestProbe::new()?)),
        }
    }

    fn configure_machine(&self, name: &str, ssh_port: u16) -> Result<()> {
        let cpus = cpu_count().to_string();
        let memory = self.config.memory_mb.to_string();
        self.vbm.run(&[
            "modifyvm",
            name,
            "--firmware",
            "bios",
            "--bioslogofadein",
            "off",
            "--bioslogofadeout",
            "off",
            "--natdnshostresolver1",
            "on",
            "--bioslogodisplaytime",
            "0",
            "--biosbootmenu",
            "disabled",
            "--ostype",
            "Linux26_64",
            "--cpus",
            &cpus,
            "--memory",
            &memory,
            "--acpi",
            "on",
            "--ioapic",
            "on",
            "--rtcuseutc",
            "on",
            "--cpuhotplug",
            "off",
            "--pae",
            "on",
            "--longmode",
            "on",
            "--synthcpu",
            "off",
            "--hpet",
            "on",
            "--hwvirtex",
            "on",
            "--triplefaultreset",
            "off",
            "--nestedpaging",
            "on",
            "--largepages",
            "on",
            "--vtxvpid",
            "on",
            "--vtxux",
            "off",
            "--accelerate3d",
            "off",
            "--boot1",
            "dvd",
        ])?;

        self.vbm.run(&[
            "modifyvm",
            name,
            "--nic1",
            "nat",
            "--nictype1",
            "virtio",
            "--cableconnected1",
            "on",
        ])?;

        let forward = format!("ssh,tcp,127.0.0.1,{},,22", ssh_port);
        self.vbm.run(&["modifyvm", name, "--natpf1", &forward])?;

        let network = get_or_create_host_only_network(self.vbm.as_ref(), &self.network)?;
        self.vbm.run(&[
            "modifyvm",
            name,
            "--nic2",
            "hostonly",
            "--nictype2",
            "virtio",
            "--hostonlyadapter2",
            &network.name,
            "--cableconnected2",
            "on",
        ])
    }

    fn attach_storage(&self, name: &str, iso: &Path) -> Result<()> {
        self.vbm.run(&[
            "storagectl",
            name,
            "--name",
            STORAGE_CONTROLLER,
            "--add",
            "sata",
            "--hostiocache",
            "on",
        ])?;

        let iso = iso.to_string_lossy().into_owned();
        let disk = self.disk_path().to_string_lossy().into_owned();
        for (port, kind, medium) in [("0", "dvddrive", iso.as_str()), ("1", "hdd", disk.as_str())] {
            self.vbm.run(&[
                "storageattach",
                name,
                "--storagectl",
                STORAGE_CONTROLLER,
                "--port",
                port,
                "--device",
                "0",
                "--type",
                kind,
                "--medium",
                medium,
            ])?;
        }
        Ok(())
    }
}

/// Virtual CPUs for a new machine.
fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_CPUS)
}

/// Ask the OS for a free local TCP port.
fn allocate_local_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

fn generate_machine_name() -> String {
    format!("host-{}", uuid::Uuid::new_v4().simple())
}

/// Extract the address of the first `inet <addr>/<prefix>` line of
/// `ip addr show` output.
pub fn parse_inet_addr(out: &str) -> Option<String> {
    out.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("inet"), Some(cidr)) => Some(cidr.split('/').next().unwrap_or(cidr).to_string()),
            _ => None,
        }
    })
}

fn parse_positive<T>(option: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(Error::config(format!(
            "invalid --virtualbox-{} {:?}: expected a positive number",
            option, value
        ))),
    }
}

impl Driver for VirtualBoxDriver {
    fn driver_name(&self) -> &'static str {
        "virtualbox"
    }

    fn get_options(&self) -> DriverOptions {
        let mut options = DriverOptions::new();
        if let Some(name) = &self.config.machine_name {
            options.insert(MACHINE_NAME_OPTION.to_string(), name.clone());
        }
        options.insert(MEMORY_OPTION.to_string(), self.config.memory_mb.to_string());
        options.insert(
            DISK_SIZE_OPTION.to_string(),
            self.config.disk_size_mb.to_string(),
        );
        options
    }

    fn set_config_from_options(&mut self, options: &DriverOptions) -> Result<()> {
        check_known_options(self.driver_name(), options, Self::CREATE_FLAGS)?;

        let mut config = VirtualBoxConfig::default();
        if let Some(name) = options.get(MACHINE_NAME_OPTION) {
            if name.trim().is_empty() {
                return Err(Error::config("--virtualbox-machine-name must not be empty"));
            }
            config.machine_name = Some(name.trim().to_string());
        }
        if let Some(memory) = options.get(MEMORY_OPTION) {
            config.memory_mb = parse_positive(MEMORY_OPTION, memory)?;
        }
        if let Some(size) = options.get(DISK_SIZE_OPTION) {
            config.disk_size_mb = parse_positive(DISK_SIZE_OPTION, size)?;
        }

        self.config = config;
        Ok(())
    }

    fn get_url(&self) -> Result<String> {
        Ok(format!("tcp://{}:{}", self.get_ip()?, DOCKER_PORT))
    }

    fn get_ip(&self) -> Result<String> {
        let out = self.ssh.output(self.ssh_command(&["ip addr show dev eth1"])?)?;
        tracing::debug!(output = %out.trim(), "interface listing");
        parse_inet_addr(&out).ok_or_else(|| Error::NoIpAddress(out.trim().to_string()))
    }

    fn get_state(&self) -> Result<State> {
        Ok(parse_vm_state(&self.machine_info()?))
    }

    fn create(&mut self) -> Result<()> {
        let name = self
            .config
            .machine_name
            .get_or_insert_with(generate_machine_name)
            .clone();
        tracing::info!(
            machine = %name,
            memory_mb = self.config.memory_mb,
            "creating virtualbox machine"
        );

        let iso = self.boot_image.ensure()?;

        let key = self.ssh_key_path();
        ssh::generate_ssh_key(&key)?;
        let public_key = std::fs::read(ssh::public_key_path(&key))?;
        let payload = disk::build_payload(&public_key)?;
        disk::create_disk_image(
            self.vbm.as_ref(),
            &self.disk_path(),
            self.config.disk_size_mb,
            payload,
        )?;

        self.vbm.run(&["createvm", "--name", &name, "--register"])?;

        let ssh_port = allocate_local_port()?;
        self.ssh_port = Some(ssh_port);
        self.configure_machine(&name, ssh_port)?;
        self.attach_storage(&name, &iso)?;

        tracing::info!(machine = %name, ssh_port, "virtualbox machine created");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.get_state()?.is_running() {
            tracing::debug!(machine = ?self.machine_name(), "already running");
            return Ok(());
        }

        let name = self.require_machine_name()?;
        self.vbm.run(&["startvm", name, "--type", "headless"])?;

        tracing::info!(machine = %name, "waiting for host to start");
        let ssh_addr = format!("127.0.0.1:{}", self.ssh_port()?);
        probe::wait_for_tcp(&ssh_addr, self.timings.ssh)?;

        let url = format!("http://{}:{}/_ping", self.get_ip()?, DOCKER_PORT);
        let probe = self.http_probe()?;
        probe::wait_for_http(&*probe, &url, self.timings.docker, || {
            self.restart_daemon()
        })
    }

    fn stop(&mut self) -> Result<()> {
        if self.get_state()? == State::Stopped {
            return Ok(());
        }

        let name = self.require_machine_name()?;
        self.vbm.run(&["controlvm", name, "acpipowerbutton"])?;

        while self.get_state()? == State::Running {
            std::thread::sleep(self.timings.stop_poll);
        }
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        self.stop()?;
        self.start()
    }

    fn kill(&mut self) -> Result<()> {
        let name = self.require_machine_name()?;
        self.vbm.run(&["controlvm", name, "poweroff"])
    }

    fn remove(&mut self) -> Result<()> {
        if self.get_state()? == State::Running {
            self.kill()?;
        }

        let name = self.require_machine_name()?;
        tracing::info!(machine = %name, "removing virtualbox machine");
        let output = self.vbm.output_err(&["unregistervm", name, "--delete"])?;
        check_machine_output(name, "unregistervm", output).map(|_| ())
    }

    fn get_ssh_command(&self, args: &[&str]) -> Result<Option<Command>> {
        self.ssh_command(args).map(Some)
    }
}
