use std::collections::BTreeMap;

/// Service name to tags, as returned by `/v1/catalog/services`.
pub type ServiceTags = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    #[serde(rename = "ID", default)]
    pub id: String,
    pub node: String,
    pub address: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub meta: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub meta: Option<BTreeMap<String, String>>,
}

/// One element of `/v1/health/service/{name}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    pub node: Node,
    pub service: AgentService,
}

impl ServiceEntry {
    /// Address to reach the instance on; an empty service address means the
    /// instance listens on its node's address.
    pub fn address(&self) -> &str {
        if self.service.address.is_empty() {
            &self.node.address
        } else {
            &self.service.address
        }
    }

    pub fn node_meta(&self, key: &str) -> Option<&str> {
        self.node.meta.as_ref()?.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentConfig {
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugConfig {
    #[serde(rename = "DNSDomain", default)]
    pub dns_domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentMember {
    #[serde(default)]
    pub addr: String,
}

/// Subset of `/v1/agent/self` needed to bootstrap.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentSelf {
    #[serde(default)]
    pub config: AgentConfig,
    #[serde(default)]
    pub debug_config: Option<DebugConfig>,
    #[serde(default)]
    pub member: AgentMember,
}

impl AgentSelf {
    pub fn dns_domain(&self) -> Option<&str> {
        self.debug_config
            .as_ref()
            .and_then(|d| d.dns_domain.as_deref())
            .or(self.config.domain.as_deref())
            .map(|d| d.trim_end_matches('.'))
            .filter(|d| !d.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_entry_decodes() {
        let raw = r#"[{
            "Node": {"ID": "n1", "Node": "node-1", "Address": "10.0.0.1", "Datacenter": "dc1",
                     "Meta": {"aws_instance_availability-zone": "us-east-1a"}},
            "Service": {"ID": "api-1", "Service": "api", "Address": "", "Port": 9000,
                        "Tags": ["v1"]},
            "Checks": []
        }]"#;
        let entries: Vec<ServiceEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address(), "10.0.0.1");
        assert_eq!(entries[0].service.port, 9000);
        assert_eq!(
            entries[0].node_meta("aws_instance_availability-zone"),
            Some("us-east-1a")
        );
        assert_eq!(entries[0].node_meta("missing"), None);
    }

    #[test]
    fn agent_self_domain() {
        let raw = r#"{"Config": {"Datacenter": "dc1", "NodeName": "n"},
                      "DebugConfig": {"DNSDomain": "consul."},
                      "Member": {"Addr": "10.0.0.1"}}"#;
        let agent: AgentSelf = serde_json::from_str(raw).unwrap();
        assert_eq!(agent.dns_domain(), Some("consul"));

        let raw = r#"{"Config": {"Domain": "example"}}"#;
        let agent: AgentSelf = serde_json::from_str(raw).unwrap();
        assert_eq!(agent.dns_domain(), Some("example"));

        let agent: AgentSelf = serde_json::from_str("{}").unwrap();
        assert_eq!(agent.dns_domain(), None);
    }
}
