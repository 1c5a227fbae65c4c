use crate::ops::config::{Inventory, ServerDescriptor};
use crate::ops::provision::{
    ProvisionSettings, Provisioner, ProvisionerConfig, ServerReport, ServerStatus,
};
use crate::ops::secrets::SecretSource;
use crate::ops::shell::RemoteChannel;
use crate::ops::template::NginxTemplates;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Only these descriptor names. Empty means all.
    pub only: Vec<String>,
    /// Stop after the first failed server instead of moving on.
    pub fail_fast: bool,
}

/// Inventory and provisioner config, loaded before anything touches the network.
#[derive(Debug)]
pub struct DeployPlan {
    pub inventory: Inventory,
    pub config: ProvisionerConfig,
}

impl DeployPlan {
    pub fn prepare(
        inventory_path: &Path,
        templates_dir: &Path,
        settings: ProvisionSettings,
    ) -> Result<Self> {
        let inventory = Inventory::load(inventory_path)?;
        let templates = NginxTemplates::load(templates_dir)
            .with_context(|| format!("Failed to load templates from {}", templates_dir.display()))?;
        info!(
            "📋 Loaded {} server(s) from {}",
            inventory.servers.len(),
            inventory_path.display()
        );
        Ok(Self {
            inventory,
            config: ProvisionerConfig {
                templates,
                settings,
            },
        })
    }

    pub fn targets(&self, options: &DeployOptions) -> Result<Vec<&ServerDescriptor>> {
        let selected = self.inventory.select(&options.only);
        if selected.is_empty() {
            bail!(
                "No server in {} matches {:?}",
                self.inventory.path.display(),
                options.only
            );
        }
        Ok(selected)
    }

    /// Provision every selected server in inventory order, one at a time.
    pub async fn run<C, F>(
        &self,
        options: &DeployOptions,
        mut open: F,
        secrets: &mut dyn SecretSource,
    ) -> Result<RunSummary>
    where
        C: RemoteChannel,
        F: FnMut(&ServerDescriptor) -> C,
    {
        let targets = self.targets(options)?;
        let provisioner = Provisioner::new(&self.config);
        let mut summary = RunSummary::default();

        for (idx, server) in targets.iter().copied().enumerate() {
            info!("--- [{}/{}] {} ---", idx + 1, targets.len(), server.name);
            let channel = open(server);
            let report = provisioner.provision(server, &channel, secrets).await;
            let failed = report.status() == ServerStatus::Failed;
            summary.reports.push(report);

            if failed && options.fail_fast {
                summary.not_attempted = targets[idx + 1..]
                    .iter()
                    .map(|s| s.name.clone())
                    .collect();
                if !summary.not_attempted.is_empty() {
                    warn!(
                        "Fail-fast: skipping {} remaining server(s)",
                        summary.not_attempted.len()
                    );
                }
                break;
            }
        }

        Ok(summary)
    }
}

/// Load, then run. An unreadable inventory or template stops here, before any
/// channel is opened.
pub async fn deploy<C, F>(
    inventory_path: &Path,
    templates_dir: &Path,
    settings: ProvisionSettings,
    options: &DeployOptions,
    open: F,
    secrets: &mut dyn SecretSource,
) -> Result<RunSummary>
where
    C: RemoteChannel,
    F: FnMut(&ServerDescriptor) -> C,
{
    let plan = DeployPlan::prepare(inventory_path, templates_dir, settings)?;
    plan.run(options, open, secrets).await
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<ServerReport>,
    pub not_attempted: Vec<String>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status() == ServerStatus::Failed)
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0 && self.not_attempted.is_empty()
    }

    pub fn log(&self) {
        info!("=== Deployment summary ===");
        for report in &self.reports {
            let elapsed = (report.finished_at - report.started_at).num_seconds();
            match report.status() {
                ServerStatus::Failed => {
                    let reason = report
                        .fatal()
                        .map(|r| format!("{} {}", r.step, r.outcome))
                        .unwrap_or_default();
                    error!(
                        "{} ({}): failed after {}s, {}",
                        report.name, report.host, elapsed, reason
                    );
                }
                status => info!(
                    "{} ({}): {} in {}s, {} warning(s), {}",
                    report.name,
                    report.host,
                    status,
                    elapsed,
                    report.warnings(),
                    report.address_kind.public_url(&report.domain_or_ip)
                ),
            }
        }
        for name in &self.not_attempted {
            warn!("{}: not attempted", name);
        }
    }
}
