//! Device identity captured once per session and the capability predicates
//! resources use to gate features.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::netconf::{has_tag, tag_text, unescape_xml};

/// Decoded `<get-system-information/>` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceIdentity {
    pub host_name: String,
    pub hardware_model: String,
    pub os_name: String,
    pub os_version: String,
    pub serial_number: String,
    /// The reply came from a chassis cluster node.
    pub cluster_node: bool,
}

/// Closed set of device capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Security services (zones, policies, NAT): SRX family.
    Security,
    /// Routing platform features: MX family.
    Router,
    /// Ethernet switching features: EX and QFX families.
    Switch,
    /// Chassis cluster member.
    Cluster,
}

impl DeviceIdentity {
    /// Parses a system information reply body.
    ///
    /// Cluster members answer with `multi-routing-engine-results`; the first
    /// node's `system-information` is used.
    pub fn parse(reply_body: &str) -> Option<Self> {
        let cluster_node = has_tag(reply_body, "multi-routing-engine-results");
        let info = tag_text(reply_body, "system-information")?;
        let field = |tag: &str| {
            tag_text(&info, tag)
                .map(|v| unescape_xml(v.trim()))
                .unwrap_or_default()
        };
        Some(Self {
            host_name: field("host-name"),
            hardware_model: field("hardware-model"),
            os_name: field("os-name"),
            os_version: field("os-version"),
            serial_number: field("serial-number"),
            cluster_node,
        })
    }

    /// Identity used by offline sessions, which never reach a device.
    pub fn offline() -> Self {
        Self {
            host_name: "offline".to_string(),
            ..Default::default()
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        let model = self.hardware_model.to_ascii_lowercase();
        match capability {
            Capability::Security => ["srx", "vsrx", "vjunos-firewall"]
                .iter()
                .any(|prefix| model.starts_with(prefix)),
            Capability::Router => ["mx", "vmx", "vjunos-router"]
                .iter()
                .any(|prefix| model.starts_with(prefix)),
            Capability::Switch => ["ex", "qfx", "vjunos-switch", "vqfx"]
                .iter()
                .any(|prefix| model.starts_with(prefix)),
            Capability::Cluster => self.cluster_node,
        }
    }

    /// Major release number parsed from `os_version` (`21.4R3-S1` -> 21).
    pub fn major_version(&self) -> Option<u32> {
        self.os_version
            .split(['.', 'R', 'X'])
            .next()
            .and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRX_REPLY: &str = r#"<system-information>
<hardware-model>vsrx</hardware-model>
<os-name>junos</os-name>
<os-version>21.4R3-S1</os-version>
<serial-number>A1B2C3</serial-number>
<host-name>fw-lab</host-name>
</system-information>"#;

    const CLUSTER_REPLY: &str = r#"<multi-routing-engine-results>
<multi-routing-engine-item><re-name>node0</re-name>
<system-information><hardware-model>srx345</hardware-model><os-name>junos</os-name>
<os-version>20.2R1</os-version><serial-number>X</serial-number><host-name>n0</host-name></system-information>
</multi-routing-engine-item>
<multi-routing-engine-item><re-name>node1</re-name>
<system-information><hardware-model>srx345</hardware-model><host-name>n1</host-name></system-information>
</multi-routing-engine-item>
</multi-routing-engine-results>"#;

    #[test]
    fn parses_standalone_identity() {
        let identity = DeviceIdentity::parse(SRX_REPLY).expect("identity");
        assert_eq!(identity.host_name, "fw-lab");
        assert_eq!(identity.major_version(), Some(21));
        assert!(identity.supports(Capability::Security));
        assert!(!identity.supports(Capability::Switch));
        assert!(!identity.supports(Capability::Cluster));
    }

    #[test]
    fn cluster_reply_uses_first_node() {
        let identity = DeviceIdentity::parse(CLUSTER_REPLY).expect("identity");
        assert_eq!(identity.host_name, "n0");
        assert!(identity.supports(Capability::Cluster));
    }

    #[test]
    fn missing_system_information_is_none() {
        assert!(DeviceIdentity::parse("<ok/>").is_none());
    }
}
