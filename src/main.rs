use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::time::Duration;
use supaship::logging::{self, LogLevel};
use supaship::ops::address::AddressKind;
use supaship::ops::config::Inventory;
use supaship::ops::deploy::{DeployOptions, DeployPlan};
use supaship::ops::doctor::{CheckStatus, Doctor};
use supaship::ops::materialize::ApiKeyPolicy;
use supaship::ops::provision::{ProvisionSettings, DEFAULT_CONNECT_TIMEOUT};
use supaship::ops::secrets::OsSecretSource;
use supaship::ops::shell::SshChannel;
use supaship::ops::template::NginxTemplates;
use tracing::{error, info};

fn inventory_arg() -> Arg {
    Arg::new("inventory")
        .short('i')
        .long("inventory")
        .env("SUPASHIP_INVENTORY")
        .help(
            "Server inventory (.json, .toml or .yaml). \
             Default: ./servers.json, then ~/.supaship/servers.json",
        )
}

fn templates_arg() -> Arg {
    Arg::new("templates")
        .long("templates")
        .env("SUPASHIP_TEMPLATES")
        .default_value("templates")
        .help("Directory holding the nginx templates")
}

fn cli() -> Command {
    Command::new("supaship")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Provision self-hosted Supabase on remote servers over SSH")
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .env("SUPASHIP_LOG_LEVEL")
                .value_parser(value_parser!(LogLevel))
                .default_value("info")
                .help("silent (warnings and errors), info, or debug"),
        )
        .subcommand(
            Command::new("deploy")
                .about("Provision every server in the inventory, in order")
                .arg(inventory_arg())
                .arg(templates_arg())
                .arg(
                    Arg::new("server")
                        .short('s')
                        .long("server")
                        .action(ArgAction::Append)
                        .help("Only provision servers with this name (repeatable)"),
                )
                .arg(
                    Arg::new("fail-fast")
                        .long("fail-fast")
                        .action(ArgAction::SetTrue)
                        .help("Stop after the first failed server"),
                )
                .arg(
                    Arg::new("strict")
                        .long("strict")
                        .action(ArgAction::SetTrue)
                        .help("Exit non-zero when any server failed"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Log remote scripts instead of running them"),
                )
                .arg(
                    Arg::new("connect-timeout")
                        .long("connect-timeout")
                        .value_parser(value_parser!(u64))
                        .default_value("15")
                        .help("Seconds allowed for the initial SSH connection"),
                )
                .arg(
                    Arg::new("sign-api-keys")
                        .long("sign-api-keys")
                        .action(ArgAction::SetTrue)
                        .help(
                            "Sign ANON_KEY and SERVICE_ROLE_KEY from JWT_SECRET \
                             instead of resetting them to placeholders",
                        ),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Validate the inventory and show what each server would get")
                .arg(inventory_arg())
                .arg(templates_arg()),
        )
        .subcommand(
            Command::new("render")
                .about("Print the nginx config that would be written for an address")
                .arg(
                    Arg::new("domain")
                        .short('d')
                        .long("domain")
                        .required(true)
                        .help("Domain or IPv4 address"),
                )
                .arg(templates_arg()),
        )
        .subcommand(
            Command::new("doctor")
                .about("Check local prerequisites")
                .arg(inventory_arg())
                .arg(templates_arg()),
        )
}

fn inventory_path(m: &ArgMatches) -> PathBuf {
    m.get_one::<String>("inventory")
        .map(PathBuf::from)
        .unwrap_or_else(Inventory::default_path)
}

fn templates_dir(m: &ArgMatches) -> PathBuf {
    m.get_one::<String>("templates")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("templates"))
}

#[tokio::main]
async fn main() {
    // Optional local .env with SUPASHIP_* settings
    dotenv::dotenv().ok();

    let matches = cli().get_matches();
    let level = matches
        .get_one::<LogLevel>("log-level")
        .copied()
        .unwrap_or_default();
    if let Err(e) = logging::init(level) {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }

    let result = match matches.subcommand() {
        Some(("deploy", m)) => run_deploy(m).await,
        Some(("check", m)) => run_check(m),
        Some(("render", m)) => run_render(m),
        Some(("doctor", m)) => run_doctor(m),
        _ => Ok(true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// `Ok(false)` means the run finished but should exit non-zero.
async fn run_deploy(m: &ArgMatches) -> Result<bool> {
    let dry_run = m.get_flag("dry-run");
    let connect_timeout = Duration::from_secs(
        m.get_one::<u64>("connect-timeout")
            .copied()
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT.as_secs()),
    );
    let settings = ProvisionSettings {
        connect_timeout,
        api_key_policy: if m.get_flag("sign-api-keys") {
            ApiKeyPolicy::SignFromJwtSecret
        } else {
            ApiKeyPolicy::ResetPlaceholders
        },
        dry_run,
        ..ProvisionSettings::default()
    };

    let plan = DeployPlan::prepare(&inventory_path(m), &templates_dir(m), settings)?;
    if !dry_run {
        Doctor::new().require_tools(&plan.inventory)?;
    }

    let options = DeployOptions {
        only: m
            .get_many::<String>("server")
            .map(|v| v.cloned().collect())
            .unwrap_or_default(),
        fail_fast: m.get_flag("fail-fast"),
    };

    let summary = plan
        .run(
            &options,
            |server| SshChannel::new(server, connect_timeout, dry_run),
            &mut OsSecretSource,
        )
        .await?;
    summary.log();

    if m.get_flag("strict") && !summary.all_succeeded() {
        return Ok(false);
    }
    Ok(true)
}

fn run_check(m: &ArgMatches) -> Result<bool> {
    let plan = DeployPlan::prepare(
        &inventory_path(m),
        &templates_dir(m),
        ProvisionSettings::default(),
    )?;

    println!(
        "📋 {} server(s) in {}",
        plan.inventory.servers.len(),
        plan.inventory.path.display()
    );
    for server in &plan.inventory.servers {
        let kind = AddressKind::classify(&server.domain_or_ip);
        let (variant, _) = plan.config.templates.render_for(&server.domain_or_ip);
        println!("\n🖥  {} ({})", server.name, server.target());
        println!("   URL:       {}", kind.public_url(&server.domain_or_ip));
        println!("   Template:  {}", variant);
        println!(
            "   TLS:       {}",
            if kind.wants_tls() {
                format!(
                    "certbot for {} ({})",
                    server.domain_or_ip, server.certbot_email
                )
            } else {
                "none (self-signed 443 redirect)".to_string()
            }
        );
        println!("   Firewall:  {}", if server.enable_ufw { "ufw" } else { "off" });
        println!(
            "   Auth:      {}",
            if server.uses_password() {
                "password (sshpass)"
            } else {
                "key"
            }
        );
        println!("   Path:      {}", server.supabase_path);
    }
    Ok(true)
}

fn run_render(m: &ArgMatches) -> Result<bool> {
    let domain = m
        .get_one::<String>("domain")
        .context("--domain is required")?;
    let dir = templates_dir(m);
    let templates = NginxTemplates::load(&dir)
        .with_context(|| format!("Failed to load templates from {}", dir.display()))?;
    let (variant, rendered) = templates.render_for(domain.trim());
    info!("Rendering {} template for {}", variant, domain);
    print!("{}", rendered);
    Ok(true)
}

fn run_doctor(m: &ArgMatches) -> Result<bool> {
    println!("🩺 supaship doctor");
    let report = Doctor::new().run(&inventory_path(m), &templates_dir(m));
    for check in &report.checks {
        let icon = match check.status {
            CheckStatus::Pass => "✓",
            CheckStatus::Warning => "⚠",
            CheckStatus::Fail => "✗",
        };
        println!("  {} {}: {}", icon, check.name, check.message);
    }
    Ok(report.overall_health != CheckStatus::Fail)
}
