use crate::ops::config::Inventory;
use crate::ops::template::NginxTemplates;
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("required local tool '{tool}' not found ({hint})")]
    MissingTool { tool: &'static str, hint: &'static str },
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Serialize, Clone)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
    pub overall_health: CheckStatus,
}

/// Local checks that must pass before any server is touched.
pub struct Doctor {
    probe_tool: fn(&str) -> bool,
}

impl Default for Doctor {
    fn default() -> Self {
        Self::new()
    }
}

impl Doctor {
    pub fn new() -> Self {
        Self {
            probe_tool: tool_on_path,
        }
    }

    /// Swap the tool lookup, for tests.
    pub fn with_tool_probe(probe_tool: fn(&str) -> bool) -> Self {
        Self { probe_tool }
    }

    pub fn run(&self, inventory_path: &Path, templates_dir: &Path) -> DoctorReport {
        let mut checks = Vec::new();

        let inventory = Inventory::load(inventory_path);
        checks.push(match &inventory {
            Ok(inv) => DoctorCheck {
                name: "Inventory".to_string(),
                status: CheckStatus::Pass,
                message: format!("{} server(s) in {}", inv.servers.len(), inv.path.display()),
            },
            Err(e) => DoctorCheck {
                name: "Inventory".to_string(),
                status: CheckStatus::Fail,
                message: e.to_string(),
            },
        });

        checks.push(match NginxTemplates::load(templates_dir) {
            Ok(_) => DoctorCheck {
                name: "Nginx templates".to_string(),
                status: CheckStatus::Pass,
                message: format!("secure and insecure templates in {}", templates_dir.display()),
            },
            Err(e) => DoctorCheck {
                name: "Nginx templates".to_string(),
                status: CheckStatus::Fail,
                message: e.to_string(),
            },
        });

        checks.push(self.check_tool("ssh", true));

        // Only needed when some descriptor authenticates with a password
        let needs_sshpass = inventory.as_ref().map(|i| i.any_password()).unwrap_or(false);
        checks.push(self.check_tool("sshpass", needs_sshpass));

        let overall_health = if checks.iter().any(|c| c.status == CheckStatus::Fail) {
            CheckStatus::Fail
        } else if checks.iter().any(|c| c.status == CheckStatus::Warning) {
            CheckStatus::Warning
        } else {
            CheckStatus::Pass
        };

        DoctorReport {
            checks,
            overall_health,
        }
    }

    fn check_tool(&self, tool: &str, required: bool) -> DoctorCheck {
        let found = (self.probe_tool)(tool);
        let (status, message) = match (found, required) {
            (true, _) => (CheckStatus::Pass, format!("'{}' found", tool)),
            (false, true) => (CheckStatus::Fail, format!("'{}' not found on PATH", tool)),
            (false, false) => (
                CheckStatus::Warning,
                format!("'{}' not found (only needed for password logins)", tool),
            ),
        };
        DoctorCheck {
            name: format!("Tool: {}", tool),
            status,
            message,
        }
    }

    /// Hard gate used by `deploy`: every tool the inventory needs must exist.
    pub fn require_tools(&self, inventory: &Inventory) -> Result<(), PreconditionError> {
        if !(self.probe_tool)("ssh") {
            return Err(PreconditionError::MissingTool {
                tool: "ssh",
                hint: "install openssh-client",
            });
        }
        if inventory.any_password() && !(self.probe_tool)("sshpass") {
            return Err(PreconditionError::MissingTool {
                tool: "sshpass",
                hint: "needed for servers with a password; install sshpass or use keys",
            });
        }
        Ok(())
    }
}

fn tool_on_path(tool: &str) -> bool {
    // `ssh -V` and `sshpass -V` both exist; spawning at all is what matters
    Command::new(tool).arg("-V").output().is_ok()
}
