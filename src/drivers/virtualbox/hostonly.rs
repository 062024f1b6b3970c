//! Host-only network management.
//!
//! The host-only network is shared by every VirtualBox host. It is looked up
//! by subnet and created only when no interface serves that subnet yet.

use super::vbm::VBoxManage;
use crate::error::{Error, Result};
use std::net::Ipv4Addr;

/// Prefix VirtualBox gives the internal network of a host-only interface.
const NETWORK_NAME_PREFIX: &str = "HostInterfaceNetworking-";

/// Desired host-only network layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOnlyConfig {
    /// Address of the host side of the interface.
    pub ip: Ipv4Addr,
    /// Subnet mask.
    pub netmask: Ipv4Addr,
    /// Address of the DHCP server.
    pub dhcp_ip: Ipv4Addr,
    /// First address handed out by DHCP.
    pub lower_ip: Ipv4Addr,
    /// Last address handed out by DHCP.
    pub upper_ip: Ipv4Addr,
}

impl Default for HostOnlyConfig {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::new(192, 168, 99, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            dhcp_ip: Ipv4Addr::new(192, 168, 99, 2),
            lower_ip: Ipv4Addr::new(192, 168, 99, 100),
            upper_ip: Ipv4Addr::new(192, 168, 99, 254),
        }
    }
}

/// A host-only interface as reported by `list hostonlyifs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOnlyNetwork {
    /// Interface name, e.g. `vboxnet0`.
    pub name: String,
    /// Host address.
    pub ip: Option<Ipv4Addr>,
    /// Subnet mask.
    pub netmask: Option<Ipv4Addr>,
    /// Internal network name used to key DHCP servers.
    pub network_name: String,
}

impl HostOnlyNetwork {
    /// Whether this interface serves the subnet of `ip`/`netmask`.
    pub fn serves(&self, ip: Ipv4Addr, netmask: Ipv4Addr) -> bool {
        match (self.ip, self.netmask) {
            (Some(own_ip), Some(own_mask)) => {
                own_mask == netmask && subnet(own_ip, own_mask) == subnet(ip, netmask)
            }
            _ => false,
        }
    }
}

/// A DHCP server as reported by `list dhcpservers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpServer {
    /// Internal network the server is bound to.
    pub network_name: String,
    /// Server address.
    pub ip: Option<Ipv4Addr>,
    /// Subnet mask.
    pub netmask: Option<Ipv4Addr>,
    /// First address in the pool.
    pub lower_ip: Option<Ipv4Addr>,
    /// Last address in the pool.
    pub upper_ip: Option<Ipv4Addr>,
    /// Whether the server is enabled.
    pub enabled: bool,
}

impl DhcpServer {
    fn matches(&self, config: &HostOnlyConfig) -> bool {
        self.enabled
            && self.ip == Some(config.dhcp_ip)
            && self.netmask == Some(config.netmask)
            && self.lower_ip == Some(config.lower_ip)
            && self.upper_ip == Some(config.upper_ip)
    }
}

fn subnet(ip: Ipv4Addr, netmask: Ipv4Addr) -> u32 {
    u32::from(ip) & u32::from(netmask)
}

/// Split `Key: value` listings into blocks separated by blank lines. Keys
/// are lowercased.
fn parse_blocks(out: &str) -> Vec<Vec<(String, String)>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in out.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            current.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn field<'a>(block: &'a [(String, String)], keys: &[&str]) -> Option<&'a str> {
    block
        .iter()
        .find(|(k, _)| keys.contains(&k.as_str()))
        .map(|(_, v)| v.as_str())
}

fn ip_field(block: &[(String, String)], keys: &[&str]) -> Option<Ipv4Addr> {
    field(block, keys).and_then(|v| v.parse().ok())
}

/// Parse `VBoxManage list hostonlyifs`.
pub fn parse_host_only_networks(out: &str) -> Vec<HostOnlyNetwork> {
    parse_blocks(out)
        .iter()
        .filter_map(|block| {
            let name = field(block, &["name"])?.to_string();
            let network_name = field(block, &["vboxnetworkname"])
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}{}", NETWORK_NAME_PREFIX, name));
            Some(HostOnlyNetwork {
                ip: ip_field(block, &["ipaddress"]),
                netmask: ip_field(block, &["networkmask"]),
                name,
                network_name,
            })
        })
        .collect()
}

/// Parse `VBoxManage list dhcpservers`.
pub fn parse_dhcp_servers(out: &str) -> Vec<DhcpServer> {
    parse_blocks(out)
        .iter()
        .filter_map(|block| {
            Some(DhcpServer {
                network_name: field(block, &["networkname"])?.to_string(),
                ip: ip_field(block, &["ip", "dhcpd ip"]),
                netmask: ip_field(block, &["networkmask"]),
                lower_ip: ip_field(block, &["loweripaddress"]),
                upper_ip: ip_field(block, &["upperipaddress"]),
                enabled: field(block, &["enabled"])
                    .map(|v| v.eq_ignore_ascii_case("yes"))
                    .unwrap_or(false),
            })
        })
        .collect()
}

/// Parse the interface name out of `hostonlyif create` output.
pub fn parse_created_interface(out: &str) -> Option<String> {
    let start = out.find("Interface '")? + "Interface '".len();
    let rest = &out[start..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

/// Find the interface serving `config`'s subnet, creating and configuring one
/// if none exists, and make sure its DHCP server matches `config`.
pub fn get_or_create_host_only_network(
    vbm: &dyn VBoxManage,
    config: &HostOnlyConfig,
) -> Result<HostOnlyNetwork> {
    let existing = parse_host_only_networks(&vbm.output(&["list", "hostonlyifs"])?);

    let network = match existing
        .into_iter()
        .find(|n| n.serves(config.ip, config.netmask))
    {
        Some(network) => {
            tracing::debug!(interface = %network.name, "reusing host-only network");
            network
        }
        None => create_host_only_network(vbm, config)?,
    };

    ensure_dhcp_server(vbm, &network, config)?;
    Ok(network)
}

fn create_host_only_network(
    vbm: &dyn VBoxManage,
    config: &HostOnlyConfig,
) -> Result<HostOnlyNetwork> {
    let out = vbm.output(&["hostonlyif", "create"])?;
    let name = parse_created_interface(&out).ok_or_else(|| {
        Error::command_failed(
            "VBoxManage hostonlyif create",
            format!("unexpected output: {}", out.trim()),
        )
    })?;

    tracing::info!(interface = %name, ip = %config.ip, "created host-only network");

    let ip = config.ip.to_string();
    let netmask = config.netmask.to_string();
    vbm.run(&[
        "hostonlyif",
        "ipconfig",
        &name,
        "--ip",
        &ip,
        "--netmask",
        &netmask,
    ])?;

    Ok(HostOnlyNetwork {
        network_name: format!("{}{}", NETWORK_NAME_PREFIX, name),
        name,
        ip: Some(config.ip),
        netmask: Some(config.netmask),
    })
}

fn ensure_dhcp_server(
    vbm: &dyn VBoxManage,
    network: &HostOnlyNetwork,
    config: &HostOnlyConfig,
) -> Result<()> {
    let servers = parse_dhcp_servers(&vbm.output(&["list", "dhcpservers"])?);
    let current = servers
        .iter()
        .find(|s| s.network_name == network.network_name);

    let action = match current {
        Some(server) if server.matches(config) => return Ok(()),
        Some(_) => "modify",
        None => "add",
    };

    let dhcp_ip = config.dhcp_ip.to_string();
    let netmask = config.netmask.to_string();
    let lower = config.lower_ip.to_string();
    let upper = config.upper_ip.to_string();
    vbm.run(&[
        "dhcpserver",
        action,
        "--netname",
        &network.network_name,
        "--ip",
        &dhcp_ip,
        "--netmask",
        &netmask,
        "--lowerip",
        &lower,
        "--upperip",
        &upper,
        "--enable",
    ])
}
