use quick_xml::de::from_str;

use crate::models::{PortFinding, PortState, RawScanResult};

#[derive(Debug, serde::Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<NmapHost>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapHost {
    #[serde(default)]
    status: Option<NmapStatus>,
    #[serde(rename = "address", default)]
    addresses: Vec<NmapAddress>,
    #[serde(default)]
    hostnames: Option<NmapHostnames>,
    #[serde(default)]
    ports: Option<NmapPorts>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapStatus {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, serde::Deserialize)]
struct NmapAddress {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype", default)]
    addrtype: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapHostnames {
    #[serde(rename = "hostname", default)]
    hostnames: Vec<NmapHostname>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapHostname {
    #[serde(rename = "@name")]
    name: String,
}

#[derive(Debug, serde::Deserialize)]
struct NmapPorts {
    #[serde(rename = "port", default)]
    ports: Vec<NmapPort>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapPort {
    #[serde(rename = "@portid")]
    portid: u16,
    state: NmapState,
    #[serde(default)]
    service: Option<NmapService>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, serde::Deserialize)]
struct NmapService {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@product", default)]
    product: Option<String>,
    #[serde(rename = "@version", default)]
    version: Option<String>,
}

impl NmapHost {
    fn is_up(&self) -> bool {
        self.status.as_ref().map_or(true, |s| s.state == "up")
    }

    /// Network address of the host, falling back to its first hostname when
    /// only a MAC address was reported.
    fn key(&self) -> Option<String> {
        self.addresses
            .iter()
            .find(|a| matches!(a.addrtype.as_deref(), None | Some("ipv4") | Some("ipv6")))
            .map(|a| a.addr.clone())
            .or_else(|| {
                self.hostnames
                    .as_ref()
                    .and_then(|h| h.hostnames.first().map(|e| e.name.clone()))
            })
    }
}

pub fn parse_nmap_xml(xml: &str) -> anyhow::Result<RawScanResult> {
    let run: NmapRun = from_str(xml)?;
    let mut scan = RawScanResult::default();

    for host in run.hosts {
        if !host.is_up() {
            continue;
        }
        let Some(key) = host.key() else {
            continue;
        };

        let mut findings: Vec<PortFinding> = host
            .ports
            .map(|p| p.ports)
            .unwrap_or_default()
            .into_iter()
            .map(|p| {
                let service = p.service.unwrap_or(NmapService {
                    name: None,
                    product: None,
                    version: None,
                });
                PortFinding {
                    port: p.portid,
                    state: PortState::from_nmap(&p.state.state),
                    service_name: service.name.unwrap_or_default(),
                    product: service.product.unwrap_or_default(),
                    version: service.version.unwrap_or_default(),
                }
            })
            .collect();
        findings.sort_by_key(|f| f.port);

        scan.hosts.entry(key).or_default().extend(findings);
    }

    Ok(scan)
}
