use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// DeviceIdentity names one device instance in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    name: String,
    namespace: String,
}

impl DeviceIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// CertSpec requests a self-signed certificate with the given identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertSpec {
    pub certificate_id: String,
}

impl CertSpec {
    pub fn new(certificate_id: impl Into<String>) -> Self {
        Self {
            certificate_id: certificate_id.into(),
        }
    }
}

/// Vendor of a node, used to pick the node implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vendor {
    #[default]
    Juniper,
    Arista,
    Cisco,
    Nokia,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Vendor::Juniper => "JUNIPER",
            Vendor::Arista => "ARISTA",
            Vendor::Cisco => "CISCO",
            Vendor::Nokia => "NOKIA",
            Vendor::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Service exposed by the node, keyed by outside port in NodeSpec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub inside: u32,
}

/// Interface attached to the node; `name` is the vendor-side interface name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interface {
    pub name: String,
}

/// SelfSignedCert asks the node to generate its own key pair and certificate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfSignedCert {
    pub cert_name: String,
    pub key_name: String,
    pub key_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedCert>,
}

/// NodeConfig holds the container-level settings of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub image: String,
    pub init_image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub entry_command: String,
    pub config_path: String,
    pub config_file: String,
    pub sleep: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<CertConfig>,
}

/// NodeSpec is the declared configuration of a single node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    pub name: String,
    pub vendor: Vendor,
    pub labels: BTreeMap<String, String>,
    pub constraints: BTreeMap<String, String>,
    pub services: BTreeMap<u32, Service>,
    pub config: NodeConfig,
    pub interfaces: BTreeMap<String, Interface>,
}

impl NodeSpec {
    pub fn identity(&self, namespace: &str) -> DeviceIdentity {
        DeviceIdentity::new(self.name.clone(), namespace)
    }

    /// The cert request, if the node declares a self-signed certificate
    pub fn cert_spec(&self) -> Option<CertSpec> {
        self.config
            .cert
            .as_ref()
            .and_then(|c| c.self_signed.as_ref())
            .map(|s| CertSpec::new(s.cert_name.clone()))
    }

    /// A cPTX is channelized when any eth link maps to a broken-out port (e.g. `et-0/0/0:1`)
    pub fn is_channelized(&self) -> bool {
        self.interfaces
            .iter()
            .any(|(key, intf)| key.contains("eth") && intf.name.contains(':'))
    }

    /// Environment passed to the cPTX container (downward API style values)
    pub fn container_env(&self) -> BTreeMap<String, String> {
        let mut env = self.config.env.clone();
        if self.is_channelized() {
            env.insert("CPTX_CHANNELIZED".to_string(), "1".to_string());
        }
        env.insert(
            "CPTX_CPU_LIMIT".to_string(),
            self.constraints.get("cpu").cloned().unwrap_or_default(),
        );
        env.insert(
            "CPTX_MEMORY_LIMIT".to_string(),
            self.constraints.get("memory").cloned().unwrap_or_default(),
        );
        env
    }

    /// Fill in cPTX defaults for every field left empty
    pub fn with_cptx_defaults(mut self) -> Self {
        if self.name.is_empty() {
            self.name = "default_cptx_node".to_string();
        }
        if self.constraints.is_empty() {
            self.constraints = BTreeMap::from([
                ("cpu".to_string(), "8".to_string()),
                ("memory".to_string(), "8Gi".to_string()),
            ]);
        }
        if self.services.is_empty() {
            self.services = BTreeMap::from([
                (443, Service { name: "ssl".to_string(), inside: 443 }),
                (22, Service { name: "ssh".to_string(), inside: 22 }),
                (32767, Service { name: "gnmi".to_string(), inside: 32767 }),
            ]);
        }
        self.labels
            .entry("vendor".to_string())
            .and_modify(|v| {
                if v.is_empty() {
                    *v = Vendor::Juniper.to_string();
                }
            })
            .or_insert_with(|| Vendor::Juniper.to_string());

        let cfg = &mut self.config;
        if cfg.command.is_empty() {
            cfg.command = vec!["/entrypoint.sh".to_string()];
        }
        if cfg.image.is_empty() {
            cfg.image = "cptx:latest".to_string();
        }
        if cfg.env.is_empty() {
            cfg.env = BTreeMap::from([("CPTX".to_string(), "1".to_string())]);
        }
        if cfg.entry_command.is_empty() {
            cfg.entry_command = format!("kubectl exec -it {} -- cli -c", self.name);
        }
        if cfg.config_path.is_empty() {
            cfg.config_path = "/home/evo/configdisk".to_string();
        }
        if cfg.config_file.is_empty() {
            cfg.config_file = "juniper.conf".to_string();
        }
        self
    }
}
