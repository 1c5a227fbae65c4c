//! Provisioning steps: outcome types and the bash each step sends to the host.
//!
//! Every script is safe to re-run: installs are gated on `command -v`, services are
//! re-enabled unconditionally, and files are only created when absent.

use crate::ops::shell::shell_quote;

pub const SITES_AVAILABLE: &str = "/etc/nginx/sites-available";
pub const SITES_ENABLED: &str = "/etc/nginx/sites-enabled";
pub const SELF_SIGNED_CERT: &str = "/etc/nginx/ssl/supaship-selfsigned.crt";
pub const SELF_SIGNED_KEY: &str = "/etc/nginx/ssl/supaship-selfsigned.key";
pub const ACME_WEBROOT: &str = "/var/www/certbot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Probe,
    Prerequisites,
    Docker,
    Nginx,
    Fetch,
    Configure,
    StackStart,
    ReverseProxy,
    Tls,
    Firewall,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::Probe => "probe",
            Step::Prerequisites => "prerequisites",
            Step::Docker => "docker",
            Step::Nginx => "nginx",
            Step::Fetch => "fetch",
            Step::Configure => "configure",
            Step::StackStart => "stack-start",
            Step::ReverseProxy => "reverse-proxy",
            Step::Tls => "tls",
            Step::Firewall => "firewall",
        };
        write!(f, "{}", name)
    }
}

/// Whether the sequence goes on after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Skipped(String),
    /// Logged, collected, sequence continues.
    Warning(String),
    /// Aborts this server's sequence.
    Fatal(String),
}

impl StepOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Skipped(reason) => write!(f, "skipped: {}", reason),
            Self::Warning(reason) => write!(f, "warning: {}", reason),
            Self::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: StepOutcome,
}

/// `sudo ` for non-root logins, nothing for root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Privilege {
    pub sudo: bool,
}

impl Privilege {
    pub fn from_uid(uid: &str) -> Self {
        Self {
            sudo: uid.trim() != "0",
        }
    }

    pub fn prefix(self) -> &'static str {
        if self.sudo {
            "sudo "
        } else {
            ""
        }
    }
}

const PROLOGUE: &str = "set -eo pipefail\nexport DEBIAN_FRONTEND=noninteractive\n";

pub fn probe_script() -> &'static str {
    "id -u"
}

pub fn prerequisites_script(p: Privilege) -> String {
    let s = p.prefix();
    format!(
        "{PROLOGUE}\
if ! command -v curl >/dev/null 2>&1 || ! command -v git >/dev/null 2>&1 || ! command -v openssl >/dev/null 2>&1; then
  {s}apt-get update -y
  {s}apt-get install -y curl git ca-certificates gnupg openssl
fi
"
    )
}

pub fn docker_script(p: Privilege) -> String {
    let s = p.prefix();
    format!(
        "{PROLOGUE}\
if ! command -v docker >/dev/null 2>&1; then
  curl -fsSL https://get.docker.com | {s}sh
fi
if ! {s}docker compose version >/dev/null 2>&1; then
  {s}apt-get update -y
  {s}apt-get install -y docker-compose-plugin
fi
{s}systemctl enable --now docker
"
    )
}

pub fn nginx_script(p: Privilege) -> String {
    let s = p.prefix();
    format!(
        "{PROLOGUE}\
if ! command -v nginx >/dev/null 2>&1; then
  {s}apt-get update -y
  {s}apt-get install -y nginx
fi
{s}systemctl enable --now nginx
"
    )
}

/// Hand the install path to the login user, then clone or fast-forward unprivileged.
pub fn fetch_script(p: Privilege, install_path: &str, repo_url: &str) -> String {
    let s = p.prefix();
    let path = shell_quote(install_path);
    let git_dir = shell_quote(&format!("{}/.git", install_path.trim_end_matches('/')));
    let repo = shell_quote(repo_url);
    format!(
        "{PROLOGUE}\
{s}mkdir -p {path}
{s}chown -R \"$(id -un)\":\"$(id -gn)\" {path}
if [ -d {git_dir} ]; then
  git -C {path} pull --ff-only
else
  git clone --depth 1 {repo} {path}
fi
"
    )
}

/// Seed `.env` from the example only when absent, then print it.
pub fn read_env_script(compose_dir: &str) -> String {
    let dir = shell_quote(compose_dir);
    format!(
        "{PROLOGUE}\
cd {dir}
if [ ! -f .env ]; then
  cp .env.example .env
fi
cat .env
"
    )
}

pub fn stack_start_script(p: Privilege, compose_dir: &str) -> String {
    let s = p.prefix();
    let dir = shell_quote(compose_dir);
    format!(
        "{PROLOGUE}\
cd {dir}
{s}docker compose pull
{s}docker compose up -d --remove-orphans
"
    )
}

pub fn self_signed_cert_script(p: Privilege, address: &str) -> String {
    let s = p.prefix();
    let subject = shell_quote(&format!("/CN={}", address));
    format!(
        "{PROLOGUE}\
{s}mkdir -p /etc/nginx/ssl
if [ ! -f {SELF_SIGNED_CERT} ] || [ ! -f {SELF_SIGNED_KEY} ]; then
  {s}openssl req -x509 -nodes -newkey rsa:2048 -days 3650 \\
    -keyout {SELF_SIGNED_KEY} -out {SELF_SIGNED_CERT} -subj {subject}
fi
"
    )
}

pub fn site_available_path(site: &str) -> String {
    format!("{}/{}", SITES_AVAILABLE, site)
}

/// Drop the distro default and any stale link of ours, then enable the new site.
pub fn enable_site_script(p: Privilege, site: &str) -> String {
    let s = p.prefix();
    let available = shell_quote(&site_available_path(site));
    let enabled = shell_quote(&format!("{}/{}", SITES_ENABLED, site));
    format!(
        "{PROLOGUE}\
{s}rm -f {SITES_ENABLED}/default {enabled}
{s}ln -s {available} {enabled}
"
    )
}

pub fn validate_proxy_script(p: Privilege) -> String {
    format!("{}nginx -t 2>&1\n", p.prefix())
}

pub fn reload_proxy_script(p: Privilege) -> String {
    format!("{}systemctl reload nginx\n", p.prefix())
}

pub fn tls_script(p: Privilege, domain: &str, email: &str) -> String {
    let s = p.prefix();
    let domain = shell_quote(domain);
    let email = shell_quote(email);
    format!(
        "{PROLOGUE}\
if ! command -v certbot >/dev/null 2>&1; then
  {s}apt-get update -y
  {s}apt-get install -y certbot python3-certbot-nginx
fi
{s}mkdir -p {ACME_WEBROOT}
{s}chown -R www-data:www-data {ACME_WEBROOT}
{s}certbot --nginx -d {domain} --non-interactive --agree-tos -m {email} --redirect
"
    )
}

pub fn firewall_script(p: Privilege, ssh_port: u16) -> String {
    let s = p.prefix();
    format!(
        "{PROLOGUE}\
if ! command -v ufw >/dev/null 2>&1; then
  {s}apt-get update -y
  {s}apt-get install -y ufw
fi
{s}ufw default deny incoming
{s}ufw default allow outgoing
{s}ufw allow {ssh_port}/tcp
{s}ufw allow 80/tcp
{s}ufw allow 443/tcp
{s}ufw --force enable
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: Privilege = Privilege { sudo: false };
    const USER: Privilege = Privilege { sudo: true };

    #[test]
    fn privilege_from_probe_output() {
        assert_eq!(Privilege::from_uid("0\n"), ROOT);
        assert_eq!(Privilege::from_uid("1000"), USER);
    }

    #[test]
    fn installs_are_gated_and_services_always_enabled() {
        let script = docker_script(USER);
        assert!(script.contains("if ! command -v docker"));
        assert!(script.contains("\nsudo systemctl enable --now docker\n"));
        assert!(nginx_script(ROOT).contains("\nsystemctl enable --now nginx\n"));
    }

    #[test]
    fn fetch_chowns_before_unprivileged_git() {
        let script = fetch_script(USER, "/opt/supa base", "https://github.com/supabase/supabase");
        let chown = script.find("sudo chown -R").unwrap();
        let clone = script.find("git clone --depth 1").unwrap();
        assert!(chown < clone);
        assert!(script.contains("'/opt/supa base/.git'"));
        assert!(!script.contains("sudo git"));
    }

    #[test]
    fn env_seeded_only_when_absent() {
        let script = read_env_script("/opt/supabase/docker");
        assert!(script.contains("if [ ! -f .env ]; then\n  cp .env.example .env\nfi"));
        assert!(script.trim_end().ends_with("cat .env"));
    }

    #[test]
    fn stack_pulls_before_up() {
        let script = stack_start_script(ROOT, "/opt/supabase/docker");
        let pull = script.find("docker compose pull").unwrap();
        let up = script.find("docker compose up -d --remove-orphans").unwrap();
        assert!(pull < up);
    }

    #[test]
    fn tls_requests_exact_domain_and_email() {
        let script = tls_script(USER, "app.example.org", "a@b.com");
        assert!(script.contains(
            "sudo certbot --nginx -d 'app.example.org' --non-interactive --agree-tos -m 'a@b.com' --redirect"
        ));
        assert!(script.contains("chown -R www-data:www-data /var/www/certbot"));
    }

    #[test]
    fn firewall_allows_only_ssh_http_https() {
        let script = firewall_script(ROOT, 2222);
        let allows: Vec<&str> = script.lines().filter(|l| l.contains("ufw allow ")).collect();
        assert_eq!(
            allows,
            vec!["ufw allow 2222/tcp", "ufw allow 80/tcp", "ufw allow 443/tcp"]
        );
        assert!(script.contains("ufw default deny incoming"));
        assert!(script.trim_end().ends_with("ufw --force enable"));
    }

    #[test]
    fn enable_site_removes_default_and_same_name() {
        let script = enable_site_script(USER, "supabase");
        assert!(script.contains(
            "sudo rm -f /etc/nginx/sites-enabled/default '/etc/nginx/sites-enabled/supabase'"
        ));
        assert!(script.contains(
            "sudo ln -s '/etc/nginx/sites-available/supabase' '/etc/nginx/sites-enabled/supabase'"
        ));
    }
}
