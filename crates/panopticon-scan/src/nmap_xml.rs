//! Nmap XML report model.
//!
//! Typed structs for the `-oX` report, deserialized with `quick-xml` + serde.
//! Only the elements the inventory consumes are modelled; everything else in
//! the document is ignored. `<host>` elements may be interleaved with
//! `<hosthint>`, `<taskbegin>` and similar siblings, which relies on
//! quick-xml's `overlapped-lists` feature.

use serde::Deserialize;

use crate::error::{Result, ScanError};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
}

/// A single host from the report.
#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
    pub ports: Option<Ports>,
    pub os: Option<OsMatches>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<NmapPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapPort {
    #[serde(rename = "@protocol")]
    pub protocol: String,
    /// Kept as text; a malformed id only drops this port.
    #[serde(rename = "@portid")]
    pub port_id: String,
    pub state: PortState,
    pub service: Option<NmapService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapService {
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@product")]
    pub product: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatches {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: String,
}

impl NmapHost {
    /// Extract the IPv4 address, if present.
    pub fn ipv4(&self) -> Option<&str> {
        self.address_of("ipv4")
    }

    /// Extract the MAC address, if present.
    pub fn mac(&self) -> Option<&str> {
        self.address_of("mac")
    }

    fn address_of(&self, kind: &str) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == kind)
            .map(|a| a.addr.as_str())
            .filter(|a| !a.is_empty())
    }

    /// Extract the first hostname, if present.
    pub fn hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()
            .and_then(|hn| hn.hostnames.first())
            .map(|h| h.name.as_str())
    }

    /// Check if the host is up.
    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    /// Name of the first OS match; nmap lists the most accurate first.
    pub fn os_name(&self) -> Option<&str> {
        self.os
            .as_ref()
            .and_then(|os| os.matches.first())
            .map(|m| m.name.as_str())
    }

    /// Ports in document order, empty when the host has no `<ports>`.
    pub fn port_list(&self) -> &[NmapPort] {
        self.ports
            .as_ref()
            .map(|p| p.ports.as_slice())
            .unwrap_or_default()
    }
}

impl NmapPort {
    pub fn is_open(&self) -> bool {
        self.state.state == "open"
    }

    /// Numeric port id, `None` if the attribute is not a valid port.
    pub fn number(&self) -> Option<u16> {
        self.port_id.trim().parse().ok()
    }

    pub fn service_name(&self) -> &str {
        self.service
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .unwrap_or("")
    }

    /// `"<product> <version>"`, the product alone, or empty.
    pub fn service_version(&self) -> String {
        let Some(service) = self.service.as_ref() else {
            return String::new();
        };
        match (
            service.product.as_deref().filter(|p| !p.is_empty()),
            service.version.as_deref().filter(|v| !v.is_empty()),
        ) {
            (Some(product), Some(version)) => format!("{product} {version}"),
            (Some(product), None) => product.to_string(),
            _ => String::new(),
        }
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_snapshot(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| ScanError::SnapshotParse(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISCOVERY_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sS -F 10.0.1.0/24" startstr="Mon Feb 24 10:00:00 2026">
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.1.1" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:01" addrtype="mac" vendor="TestVendor"/>
    <hostnames>
      <hostname name="gateway.local" type="PTR"/>
    </hostnames>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="10.0.1.99" addrtype="ipv4"/>
  </host>
  <runstats>
    <finished time="1740400000" elapsed="2.50"/>
    <hosts up="1" down="1" total="2"/>
  </runstats>
</nmaprun>"#;

    const SERVICE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sS -sV -O 10.0.1.1">
  <host>
    <status state="up" reason="syn-ack"/>
    <address addr="10.0.1.1" addrtype="ipv4"/>
    <hostnames>
      <hostname name="web-server.local" type="PTR"/>
    </hostnames>
    <ports>
      <extraports state="closed" count="996"/>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="9.6" extrainfo="Ubuntu Linux"/>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open" reason="syn-ack"/>
        <service name="http" product="nginx"/>
      </port>
      <port protocol="udp" portid="161">
        <state state="open" reason="udp-response"/>
      </port>
      <port protocol="tcp" portid="3306">
        <state state="filtered" reason="no-response"/>
      </port>
      <port protocol="tcp" portid="http-alt">
        <state state="open" reason="syn-ack"/>
      </port>
    </ports>
    <os>
      <osmatch name="Linux 5.15" accuracy="95">
        <osclass type="general purpose" vendor="Linux" osfamily="Linux"/>
      </osmatch>
      <osmatch name="Linux 6.1" accuracy="90"/>
    </os>
  </host>
</nmaprun>"#;

    #[test]
    fn parses_host_identity() {
        let run = parse_snapshot(DISCOVERY_XML.as_bytes()).unwrap();
        assert_eq!(run.hosts.len(), 2);
        assert_eq!(run.hosts.iter().filter(|h| h.is_up()).count(), 1);

        let gateway = &run.hosts[0];
        assert_eq!(gateway.ipv4(), Some("10.0.1.1"));
        assert_eq!(gateway.mac(), Some("AA:BB:CC:DD:EE:01"));
        assert_eq!(gateway.hostname(), Some("gateway.local"));
        assert_eq!(gateway.os_name(), None);
        assert!(gateway.port_list().is_empty());
    }

    #[test]
    fn parses_ports_and_services() {
        let run = parse_snapshot(SERVICE_XML.as_bytes()).unwrap();
        let host = &run.hosts[0];
        assert_eq!(host.os_name(), Some("Linux 5.15"));

        let ports = host.port_list();
        assert_eq!(ports.len(), 5);

        assert_eq!(ports[0].number(), Some(22));
        assert_eq!(ports[0].service_name(), "ssh");
        assert_eq!(ports[0].service_version(), "OpenSSH 9.6");

        assert_eq!(ports[1].service_version(), "nginx");
        assert_eq!(ports[2].protocol, "udp");
        assert_eq!(ports[2].service_name(), "");
        assert_eq!(ports[2].service_version(), "");

        assert!(!ports[3].is_open());
        assert!(ports[4].is_open());
        assert_eq!(ports[4].number(), None);
    }

    #[test]
    fn parses_empty_report() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sn 192.168.99.0/24">
  <runstats>
    <finished elapsed="1.00"/>
    <hosts up="0" down="256" total="256"/>
  </runstats>
</nmaprun>"#;

        let run = parse_snapshot(xml.as_bytes()).unwrap();
        assert!(run.hosts.is_empty());
    }

    #[test]
    fn parses_hosts_interleaved_with_progress_elements() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sS -oX - 10.0.0.0/30">
  <taskbegin task="ARP Ping Scan" time="1740400000"/>
  <hosthint>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.0.1" addrtype="ipv4"/>
  </hosthint>
  <taskend task="ARP Ping Scan" time="1740400001"/>
  <host>
    <status state="up"/>
    <address addr="10.0.0.1" addrtype="ipv4"/>
  </host>
  <hosthint>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.0.2" addrtype="ipv4"/>
  </hosthint>
  <taskprogress task="SYN Stealth Scan" percent="50.00"/>
  <host>
    <status state="up"/>
    <address addr="10.0.0.2" addrtype="ipv4"/>
  </host>
  <runstats><finished elapsed="2.00"/></runstats>
</nmaprun>"#;

        let run = parse_snapshot(xml.as_bytes()).unwrap();
        let ips: Vec<_> = run.hosts.iter().filter_map(|h| h.ipv4()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn rejects_truncated_document() {
        let err = parse_snapshot(b"<nmaprun><host><status state=\"up\"").unwrap_err();
        assert!(matches!(err, ScanError::SnapshotParse(_)));
    }
}
