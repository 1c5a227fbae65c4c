use crate::ops::address::AddressKind;
use crate::ops::config::ServerDescriptor;
use crate::ops::env_file::EnvFile;
use crate::ops::materialize::{materialize, ApiKeyPolicy, KongPorts};
use crate::ops::secrets::SecretSource;
use crate::ops::shell::{CommandOutput, RemoteChannel};
use crate::ops::steps::{self, Privilege, Step, StepOutcome, StepRecord};
use crate::ops::template::{NginxTemplates, TemplateVariant, PLACEHOLDER};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

pub const DEFAULT_REPO_URL: &str = "https://github.com/supabase/supabase";
pub const DEFAULT_COMPOSE_SUBDIR: &str = "docker";
pub const DEFAULT_SITE_NAME: &str = "supabase";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Extra time the probe gets on top of ssh's own ConnectTimeout.
const PROBE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub repo_url: String,
    pub compose_subdir: String,
    pub site_name: String,
    pub kong_ports: KongPorts,
    pub connect_timeout: Duration,
    pub api_key_policy: ApiKeyPolicy,
    pub dry_run: bool,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            repo_url: DEFAULT_REPO_URL.to_string(),
            compose_subdir: DEFAULT_COMPOSE_SUBDIR.to_string(),
            site_name: DEFAULT_SITE_NAME.to_string(),
            kong_ports: KongPorts::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            api_key_policy: ApiKeyPolicy::default(),
            dry_run: false,
        }
    }
}

/// Everything a provisioner needs besides the descriptor, built once per run.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub templates: NginxTemplates,
    pub settings: ProvisionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Succeeded,
    SucceededWithWarnings,
    Failed,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::SucceededWithWarnings => write!(f, "succeeded with warnings"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerReport {
    pub name: String,
    pub host: String,
    pub domain_or_ip: String,
    pub address_kind: AddressKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<StepRecord>,
}

impl ServerReport {
    pub fn status(&self) -> ServerStatus {
        if self.fatal().is_some() {
            ServerStatus::Failed
        } else if self.warnings() > 0 {
            ServerStatus::SucceededWithWarnings
        } else {
            ServerStatus::Succeeded
        }
    }

    pub fn warnings(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_warning()).count()
    }

    pub fn fatal(&self) -> Option<&StepRecord> {
        self.records.iter().find(|r| r.outcome.is_fatal())
    }

    pub fn outcome_of(&self, step: Step) -> Option<&StepOutcome> {
        self.records
            .iter()
            .rev()
            .find(|r| r.step == step)
            .map(|r| &r.outcome)
    }

    pub fn ran(&self, step: Step) -> bool {
        self.records.iter().any(|r| r.step == step)
    }
}

pub struct Provisioner<'a> {
    config: &'a ProvisionerConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a ProvisionerConfig) -> Self {
        Self { config }
    }

    /// Drive one host through the full sequence. Never returns early with an error:
    /// every failure lands in the report.
    pub async fn provision<C: RemoteChannel>(
        &self,
        server: &ServerDescriptor,
        channel: &C,
        secrets: &mut dyn SecretSource,
    ) -> ServerReport {
        let span = info_span!("server", name = %server.name, host = %server.host);
        async {
            let mut run = Run {
                report: ServerReport {
                    name: server.name.clone(),
                    host: server.host.clone(),
                    domain_or_ip: server.domain_or_ip.clone(),
                    address_kind: AddressKind::classify(&server.domain_or_ip),
                    started_at: Utc::now(),
                    finished_at: Utc::now(),
                    records: Vec::new(),
                },
            };

            info!(
                "🚀 Provisioning {} ({}) for {}",
                server.name,
                channel.target(),
                server.domain_or_ip
            );
            if self.config.settings.dry_run {
                info!("[DRY RUN] remote scripts are logged, not executed");
            }
            // An abort is already recorded as the report's Fatal step
            if self.sequence(server, channel, secrets, &mut run).await.is_err() {
                info!("Remaining steps skipped for {}", server.name);
            }
            channel.close().await;

            run.report.finished_at = Utc::now();
            match run.report.status() {
                ServerStatus::Failed => error!("❌ Deployment failed for {}", server.name),
                status => info!("✅ Deployment completed for {} ({})", server.name, status),
            }
            run.report
        }
        .instrument(span)
        .await
    }

    /// Stops at the first Fatal outcome.
    async fn sequence<C: RemoteChannel>(
        &self,
        server: &ServerDescriptor,
        channel: &C,
        secrets: &mut dyn SecretSource,
        run: &mut Run,
    ) -> Result<(), Aborted> {
        let settings = &self.config.settings;

        let privilege = self.probe(channel, run).await?;

        // 1. Dependencies
        let outcome = run_step(channel, &steps::prerequisites_script(privilege)).await;
        run.record(Step::Prerequisites, outcome)?;
        let outcome = run_step(channel, &steps::docker_script(privilege)).await;
        run.record(Step::Docker, outcome)?;
        let outcome = run_step(channel, &steps::nginx_script(privilege)).await;
        run.record(Step::Nginx, outcome)?;

        // 2. Application fetch
        let script = steps::fetch_script(privilege, &server.supabase_path, &settings.repo_url);
        let outcome = run_step(channel, &script).await;
        run.record(Step::Fetch, outcome)?;

        // 3. Configuration
        let outcome = self.configure(server, channel, secrets).await;
        run.record(Step::Configure, outcome)?;

        // 4. Stack start
        let compose_dir = server.compose_dir(&settings.compose_subdir);
        let outcome = run_step(channel, &steps::stack_start_script(privilege, &compose_dir)).await;
        if outcome == StepOutcome::Ok {
            warn!("Containers started; services may need a few minutes to become healthy");
        }
        run.record(Step::StackStart, outcome)?;

        // 5. Reverse proxy
        self.reverse_proxy(server, channel, privilege, run).await?;

        // 6. TLS
        let outcome = if run.report.address_kind.wants_tls() {
            let script = steps::tls_script(privilege, &server.domain_or_ip, &server.certbot_email);
            run_step(channel, &script).await
        } else {
            StepOutcome::Skipped("IPv4 address, no certificate can be issued".to_string())
        };
        run.record(Step::Tls, outcome)?;

        // 7. Firewall
        let outcome = if server.enable_ufw {
            run_step(channel, &steps::firewall_script(privilege, server.port)).await
        } else {
            StepOutcome::Skipped("disabled for this server".to_string())
        };
        run.record(Step::Firewall, outcome)?;

        Ok(())
    }

    async fn probe<C: RemoteChannel>(
        &self,
        channel: &C,
        run: &mut Run,
    ) -> Result<Privilege, Aborted> {
        let limit = self.config.settings.connect_timeout + PROBE_GRACE;
        let outcome = match tokio::time::timeout(limit, channel.exec(steps::probe_script())).await {
            Err(_) => Err(format!("no response within {}s", limit.as_secs())),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Ok(Ok(out)) if !out.success() => Err(out.describe()),
            Ok(Ok(out)) if self.config.settings.dry_run && out.stdout.trim().is_empty() => {
                info!("[DRY RUN] login privilege unknown, assuming root");
                Ok(Privilege { sudo: false })
            }
            Ok(Ok(out)) => Ok(Privilege::from_uid(&out.stdout)),
        };
        match outcome {
            Ok(privilege) => {
                run.record(Step::Probe, StepOutcome::Ok)?;
                if privilege.sudo {
                    info!("Non-root login, elevated steps will use sudo");
                }
                Ok(privilege)
            }
            Err(reason) => {
                run.record(
                    Step::Probe,
                    StepOutcome::Fatal(format!("{} unreachable: {}", channel.target(), reason)),
                )?;
                Err(Aborted)
            }
        }
    }

    async fn configure<C: RemoteChannel>(
        &self,
        server: &ServerDescriptor,
        channel: &C,
        secrets: &mut dyn SecretSource,
    ) -> StepOutcome {
        let settings = &self.config.settings;
        let compose_dir = server.compose_dir(&settings.compose_subdir);

        let current = match channel
            .exec_sensitive(&steps::read_env_script(&compose_dir))
            .await
        {
            Ok(out) if out.success() => out.stdout,
            Ok(out) => {
                return StepOutcome::Warning(format!("could not read .env: {}", out.describe()))
            }
            Err(e) => return StepOutcome::Warning(format!("could not read .env: {:#}", e)),
        };

        let mut env = EnvFile::parse(&current);
        let report = match materialize(
            &mut env,
            &server.domain_or_ip,
            settings.kong_ports,
            settings.api_key_policy,
            secrets,
            Utc::now().timestamp(),
        ) {
            Ok(report) => report,
            Err(e) => return StepOutcome::Warning(format!("{:#}", e)),
        };

        for kind in &report.generated {
            info!("🔑 Generated {}", kind.env_key());
        }
        for kind in &report.preserved {
            info!("Keeping existing {}", kind.env_key());
        }

        let rendered = env.render();
        if rendered == current {
            info!(".env already up to date");
            return StepOutcome::Ok;
        }

        let path = format!("{}/.env", compose_dir);
        match channel.upload(rendered.as_bytes(), &path, false).await {
            Ok(out) if out.success() => StepOutcome::Ok,
            Ok(out) => StepOutcome::Warning(format!("could not write .env: {}", out.describe())),
            Err(e) => StepOutcome::Warning(format!("could not write .env: {:#}", e)),
        }
    }

    async fn reverse_proxy<C: RemoteChannel>(
        &self,
        server: &ServerDescriptor,
        channel: &C,
        privilege: Privilege,
        run: &mut Run,
    ) -> Result<(), Aborted> {
        let site = &self.config.settings.site_name;
        let (variant, rendered) = self.config.templates.render_for(&server.domain_or_ip);
        info!("Using {} nginx template for {}", variant, server.domain_or_ip);
        debug_assert!(!rendered.contains(PLACEHOLDER));

        if variant == TemplateVariant::Insecure {
            let script = steps::self_signed_cert_script(privilege, &server.domain_or_ip);
            if let StepOutcome::Warning(reason) = run_step(channel, &script).await {
                run.record(
                    Step::ReverseProxy,
                    StepOutcome::Warning(format!("self-signed certificate: {}", reason)),
                )?;
            }
        }

        let config_path = steps::site_available_path(site);
        let written = match channel
            .upload(rendered.as_bytes(), &config_path, privilege.sudo)
            .await
        {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(out.describe()),
            Err(e) => Err(format!("{:#}", e)),
        };
        if let Err(reason) = written {
            return run.record(
                Step::ReverseProxy,
                StepOutcome::Fatal(format!("could not write {}: {}", config_path, reason)),
            );
        }

        if let StepOutcome::Warning(reason) =
            run_step(channel, &steps::enable_site_script(privilege, site)).await
        {
            run.record(
                Step::ReverseProxy,
                StepOutcome::Warning(format!("enabling site: {}", reason)),
            )?;
        }

        let validation = channel.exec(&steps::validate_proxy_script(privilege)).await;
        let failure = match &validation {
            Ok(out) if out.success() => None,
            Ok(out) => Some(out.describe()),
            Err(e) => Some(format!("{:#}", e)),
        };
        if let Some(reason) = failure {
            let detail = validation
                .as_ref()
                .map(|o| format!("{}{}", o.stdout, o.stderr))
                .unwrap_or_default();
            error!(
                "nginx rejected the rendered config {}:\n{}\n--- nginx -t ---\n{}",
                config_path,
                rendered,
                detail.trim_end()
            );
            return run.record(
                Step::ReverseProxy,
                StepOutcome::Fatal(format!("nginx -t failed: {}", reason)),
            );
        }

        let outcome = match run_step(channel, &steps::reload_proxy_script(privilege)).await {
            StepOutcome::Warning(reason) => StepOutcome::Warning(format!("reload: {}", reason)),
            other => other,
        };
        run.record(Step::ReverseProxy, outcome)
    }
}

/// A Fatal outcome was recorded; the rest of the sequence is skipped.
#[derive(Debug)]
struct Aborted;

/// Collects records and turns a Fatal into the sequence stop signal.
struct Run {
    report: ServerReport,
}

impl Run {
    fn record(&mut self, step: Step, outcome: StepOutcome) -> Result<(), Aborted> {
        match &outcome {
            StepOutcome::Ok => info!("✓ {}", step),
            StepOutcome::Skipped(reason) => info!("- {} skipped: {}", step, reason),
            StepOutcome::Warning(reason) => warn!("{} failed, continuing: {}", step, reason),
            StepOutcome::Fatal(reason) => error!("{} failed, aborting server: {}", step, reason),
        }
        let fatal = outcome.is_fatal();
        self.report.records.push(StepRecord { step, outcome });
        if fatal {
            Err(Aborted)
        } else {
            Ok(())
        }
    }
}

/// Best-effort step: any failure becomes a Warning.
async fn run_step<C: RemoteChannel>(channel: &C, script: &str) -> StepOutcome {
    match channel.exec(script).await {
        Ok(CommandOutput { code: Some(0), .. }) => StepOutcome::Ok,
        Ok(out) => StepOutcome::Warning(out.describe()),
        Err(e) => StepOutcome::Warning(format!("{:#}", e)),
    }
}
