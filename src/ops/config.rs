use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CERTBOT_EMAIL: &str = "admin@example.com";
pub const DEFAULT_SUPABASE_PATH: &str = "/opt/supabase";
pub const DEFAULT_INVENTORY_FILE: &str = "servers.json";

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory file not found: {0}")]
    Missing(PathBuf),
    #[error("failed to read inventory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse inventory {path}: {message}")]
    Unparsable { path: PathBuf, message: String },
    #[error("invalid inventory {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// One deployment target.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerDescriptor {
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub key_path: Option<String>,
    pub domain_or_ip: String,
    #[serde(default = "default_certbot_email")]
    pub certbot_email: String,
    #[serde(default = "default_supabase_path")]
    pub supabase_path: String,
    #[serde(default = "default_enable_ufw")]
    pub enable_ufw: bool,
}

impl ServerDescriptor {
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn uses_password(&self) -> bool {
        self.password.is_some()
    }

    /// Directory holding the compose file and `.env` inside the clone.
    pub fn compose_dir(&self, subdir: &str) -> String {
        format!("{}/{}", self.supabase_path.trim_end_matches('/'), subdir)
    }
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_certbot_email() -> String {
    DEFAULT_CERTBOT_EMAIL.to_string()
}

fn default_supabase_path() -> String {
    DEFAULT_SUPABASE_PATH.to_string()
}

fn default_enable_ufw() -> bool {
    true
}

/// `{ servers = [...] }` form shared by all three formats.
#[derive(Deserialize)]
struct TableInventory {
    #[serde(default)]
    servers: Vec<ServerDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InventoryFormat {
    Json,
    Toml,
    Yaml,
}

impl InventoryFormat {
    fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("toml") => Self::Toml,
            Some("yaml") | Some("yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

#[derive(Debug)]
pub struct Inventory {
    pub path: PathBuf,
    pub servers: Vec<ServerDescriptor>,
}

impl Inventory {
    /// `./servers.json`, else `~/.supaship/servers.json`.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from(DEFAULT_INVENTORY_FILE);
        if local.exists() {
            return local;
        }
        dirs::home_dir()
            .map(|h| h.join(".supaship").join(DEFAULT_INVENTORY_FILE))
            .filter(|p| p.exists())
            .unwrap_or(local)
    }

    pub fn load(path: &Path) -> Result<Self, InventoryError> {
        if !path.exists() {
            return Err(InventoryError::Missing(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| InventoryError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, InventoryError> {
        let unparsable = |message: String| InventoryError::Unparsable {
            path: path.to_path_buf(),
            message,
        };

        let mut servers = match InventoryFormat::from_path(path) {
            // Pick the shape up front so field errors are reported against it
            InventoryFormat::Json => {
                if content.trim_start().starts_with('[') {
                    serde_json::from_str::<Vec<ServerDescriptor>>(content)
                        .map_err(|e| unparsable(e.to_string()))?
                } else {
                    serde_json::from_str::<TableInventory>(content)
                        .map_err(|e| unparsable(e.to_string()))?
                        .servers
                }
            }
            InventoryFormat::Toml => toml::from_str::<TableInventory>(content)
                .map_err(|e| unparsable(e.to_string()))?
                .servers,
            InventoryFormat::Yaml => {
                let value: serde_yaml::Value =
                    serde_yaml::from_str(content).map_err(|e| unparsable(e.to_string()))?;
                if value.is_sequence() {
                    serde_yaml::from_value::<Vec<ServerDescriptor>>(value)
                        .map_err(|e| unparsable(e.to_string()))?
                } else {
                    serde_yaml::from_value::<TableInventory>(value)
                        .map_err(|e| unparsable(e.to_string()))?
                        .servers
                }
            }
        };

        let invalid = |message: String| InventoryError::Invalid {
            path: path.to_path_buf(),
            message,
        };

        if servers.is_empty() {
            return Err(invalid("no servers defined".to_string()));
        }

        for (idx, server) in servers.iter_mut().enumerate() {
            server.host = server.host.trim().to_string();
            server.domain_or_ip = server.domain_or_ip.trim().to_string();
            if server.host.is_empty() {
                return Err(invalid(format!("server #{} has an empty host", idx + 1)));
            }
            if server.domain_or_ip.is_empty() {
                return Err(invalid(format!(
                    "server #{} ({}) has an empty domain_or_ip",
                    idx + 1,
                    server.host
                )));
            }
            if server.name.trim().is_empty() {
                server.name = server.host.clone();
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            servers,
        })
    }

    /// Keep only descriptors whose name is listed. An empty filter keeps everything.
    pub fn select(&self, names: &[String]) -> Vec<&ServerDescriptor> {
        self.servers
            .iter()
            .filter(|s| names.is_empty() || names.iter().any(|n| n == &s.name))
            .collect()
    }

    pub fn any_password(&self) -> bool {
        self.servers.iter().any(|s| s.uses_password())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn json_list_applies_defaults() {
        let inv = Inventory::parse(
            Path::new("servers.json"),
            r#"[{"name": "a", "host": "10.0.0.1", "domain_or_ip": "10.0.0.1"}]"#,
        )
        .unwrap();
        let s = &inv.servers[0];
        assert_eq!(s.user, "root");
        assert_eq!(s.port, 22);
        assert_eq!(s.certbot_email, DEFAULT_CERTBOT_EMAIL);
        assert_eq!(s.supabase_path, DEFAULT_SUPABASE_PATH);
        assert!(s.enable_ufw);
        assert!(s.password.is_none());
    }

    #[test]
    fn json_wrapped_object_with_password() {
        let inv = Inventory::parse(
            Path::new("servers.json"),
            r#"{"servers": [{"host": "h", "user": "ubuntu", "password": "pw",
                "domain_or_ip": "api.example.com", "enable_ufw": false}]}"#,
        )
        .unwrap();
        let s = &inv.servers[0];
        assert_eq!(s.name, "h");
        assert_eq!(s.password.as_ref().unwrap().expose_secret(), "pw");
        assert!(!s.enable_ufw);
    }

    #[test]
    fn toml_and_yaml_by_extension() {
        let toml_inv = Inventory::parse(
            Path::new("servers.toml"),
            "[[servers]]\nname = \"t\"\nhost = \"h1\"\ndomain_or_ip = \"a.example.com\"\n",
        )
        .unwrap();
        assert_eq!(toml_inv.servers[0].name, "t");

        let yaml_inv = Inventory::parse(
            Path::new("servers.yml"),
            "- host: h2\n  domain_or_ip: 192.0.2.1\n  port: 2222\n",
        )
        .unwrap();
        assert_eq!(yaml_inv.servers[0].port, 2222);
    }

    #[test]
    fn rejects_garbage_and_empty() {
        assert!(matches!(
            Inventory::parse(Path::new("s.json"), "{not json"),
            Err(InventoryError::Unparsable { .. })
        ));
        assert!(matches!(
            Inventory::parse(Path::new("s.json"), "[]"),
            Err(InventoryError::Invalid { .. })
        ));
        assert!(matches!(
            Inventory::parse(
                Path::new("s.json"),
                r#"[{"host": "h", "domain_or_ip": "  "}]"#
            ),
            Err(InventoryError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_unknown_fields() {
        let res = Inventory::parse(
            Path::new("s.json"),
            r#"[{"host": "h", "domain_or_ip": "d", "enable_firewall": true}]"#,
        );
        assert!(matches!(res, Err(InventoryError::Unparsable { .. })));
    }

    #[test]
    fn wrapped_forms_report_the_field_error() {
        let json = Inventory::parse(
            Path::new("s.json"),
            r#"{"servers": [{"host": "h", "domain_or_ip": "d", "prot": 22}]}"#,
        );
        match json {
            Err(InventoryError::Unparsable { message, .. }) => {
                assert!(message.contains("prot"), "{}", message)
            }
            other => panic!("unexpected: {:?}", other),
        }

        let yaml = Inventory::parse(
            Path::new("s.yaml"),
            "servers:\n  - host: h\n    domain_or_ip: d\n    port: not-a-port\n",
        );
        match yaml {
            Err(InventoryError::Unparsable { message, .. }) => {
                assert!(!message.contains("sequence"), "{}", message)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn select_filters_by_name() {
        let inv = Inventory::parse(
            Path::new("s.json"),
            r#"[{"name": "a", "host": "h1", "domain_or_ip": "d1"},
                {"name": "b", "host": "h2", "domain_or_ip": "d2"}]"#,
        )
        .unwrap();
        assert_eq!(inv.select(&[]).len(), 2);
        let only_b = inv.select(&["b".to_string()]);
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].host, "h2");
    }
}
