use crate::ops::address::AddressKind;
use crate::ops::env_file::{unquote, EnvFile};
use crate::ops::secrets::{sign_api_key, ApiKeyRole, SecretKind, SecretSource};
use anyhow::{Context, Result};

pub const URL_KEYS: [&str; 3] = ["SITE_URL", "API_EXTERNAL_URL", "SUPABASE_PUBLIC_URL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KongPorts {
    pub http: u16,
    pub https: u16,
}

impl Default for KongPorts {
    fn default() -> Self {
        Self {
            http: 8000,
            https: 8443,
        }
    }
}

/// What happens to `ANON_KEY` / `SERVICE_ROLE_KEY` on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiKeyPolicy {
    /// Reset to placeholders; the platform is expected to regenerate them at startup.
    #[default]
    ResetPlaceholders,
    /// Sign fresh HS256 keys with the effective `JWT_SECRET`.
    SignFromJwtSecret,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub generated: Vec<SecretKind>,
    pub preserved: Vec<SecretKind>,
}

/// Apply the per-run configuration to an `.env` document.
///
/// URL and port keys always track the descriptor. A secret is regenerated only
/// when missing, empty or still equal to its upstream placeholder (quoted or
/// not); any other
/// value is operator-owned and left alone.
pub fn materialize(
    env: &mut EnvFile,
    domain_or_ip: &str,
    ports: KongPorts,
    policy: ApiKeyPolicy,
    secrets: &mut dyn SecretSource,
    now: i64,
) -> Result<MaterializeReport> {
    let url = AddressKind::classify(domain_or_ip).public_url(domain_or_ip);
    for key in URL_KEYS {
        env.set(key, &url);
    }
    env.set("KONG_HTTP_PORT", &ports.http.to_string());
    env.set("KONG_HTTPS_PORT", &ports.https.to_string());

    let mut report = MaterializeReport::default();
    for kind in SecretKind::ALL {
        let needs_value = match env.get(kind.env_key()) {
            None => true,
            Some(v) => {
                let v = unquote(v);
                v.is_empty() || v == kind.insecure_placeholder()
            }
        };
        if needs_value {
            let value = secrets.generate(kind);
            env.set(kind.env_key(), &value);
            report.generated.push(kind);
        } else {
            report.preserved.push(kind);
        }
    }

    match policy {
        ApiKeyPolicy::ResetPlaceholders => {
            for role in ApiKeyRole::ALL {
                env.set(role.env_key(), role.placeholder());
            }
        }
        ApiKeyPolicy::SignFromJwtSecret => {
            let jwt_secret = env
                .get(SecretKind::JwtSecret.env_key())
                .map(|s| unquote(s).to_string())
                .context("JWT_SECRET missing after materialization")?;
            for role in ApiKeyRole::ALL {
                let token = sign_api_key(role, &jwt_secret, now)?;
                env.set(role.env_key(), &token);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    impl SecretSource for Counter {
        fn generate(&mut self, kind: SecretKind) -> String {
            self.0 += 1;
            format!("{}-{}", kind.env_key().to_lowercase(), self.0)
        }
    }

    const EXAMPLE: &str = "\
############
# Secrets
############
POSTGRES_PASSWORD=your-super-secret-and-long-postgres-password
JWT_SECRET=your-super-secret-jwt-token-with-at-least-32-characters-long
ANON_KEY=eyJhbGciOiJIUzI1NiJ9.old.anon
SERVICE_ROLE_KEY=eyJhbGciOiJIUzI1NiJ9.old.service
DASHBOARD_USERNAME=supabase
DASHBOARD_PASSWORD=this_password_is_insecure_and_should_be_updated
SITE_URL=http://localhost:3000
API_EXTERNAL_URL=http://localhost:8000
SUPABASE_PUBLIC_URL=http://localhost:8000
KONG_HTTP_PORT=8000
KONG_HTTPS_PORT=8443
";

    fn run(env: &mut EnvFile, addr: &str, src: &mut Counter) -> MaterializeReport {
        materialize(
            env,
            addr,
            KongPorts::default(),
            ApiKeyPolicy::ResetPlaceholders,
            src,
            0,
        )
        .unwrap()
    }

    #[test]
    fn fresh_example_gets_all_secrets() {
        let mut env = EnvFile::parse(EXAMPLE);
        let mut src = Counter(0);
        let report = run(&mut env, "api.example.com", &mut src);

        assert_eq!(report.generated.len(), 3);
        assert_eq!(env.get("POSTGRES_PASSWORD"), Some("postgres_password-1"));
        assert_eq!(env.get("DASHBOARD_USERNAME"), Some("supabase"));
        assert_eq!(env.get("ANON_KEY"), Some("your-anon-key"));
        assert_eq!(env.get("SERVICE_ROLE_KEY"), Some("your-service-role-key"));
        for key in URL_KEYS {
            assert_eq!(env.get(key), Some("https://api.example.com"));
        }
    }

    #[test]
    fn customized_secret_survives_reruns() {
        let mut env = EnvFile::parse(EXAMPLE);
        env.set("JWT_SECRET", "operator-chosen");
        let mut src = Counter(0);

        run(&mut env, "10.0.0.2", &mut src);
        run(&mut env, "10.0.0.2", &mut src);
        assert_eq!(env.get("JWT_SECRET"), Some("operator-chosen"));

        // values generated on the first run are customized from then on
        let pg = env.get("POSTGRES_PASSWORD").map(str::to_string);
        let report = run(&mut env, "10.0.0.2", &mut src);
        assert_eq!(env.get("POSTGRES_PASSWORD").map(str::to_string), pg);
        assert!(report.generated.is_empty());
    }

    #[test]
    fn placeholder_secret_regenerates_every_time() {
        let mut src = Counter(0);
        let mut first = EnvFile::parse(EXAMPLE);
        run(&mut first, "10.0.0.2", &mut src);
        let mut second = EnvFile::parse(EXAMPLE);
        run(&mut second, "10.0.0.2", &mut src);
        assert_ne!(first.get("JWT_SECRET"), second.get("JWT_SECRET"));
    }

    #[test]
    fn urls_always_overwritten() {
        let mut env = EnvFile::parse(EXAMPLE);
        let mut src = Counter(0);
        run(&mut env, "app.example.org", &mut src);
        run(&mut env, "203.0.113.5", &mut src);
        for key in URL_KEYS {
            assert_eq!(env.get(key), Some("http://203.0.113.5"));
        }
    }

    #[test]
    fn missing_keys_are_appended() {
        let mut env = EnvFile::parse("# empty\n");
        let mut src = Counter(0);
        run(&mut env, "db.example.net", &mut src);
        let rendered = env.render();
        assert!(rendered.starts_with("# empty\n"));
        assert!(rendered.contains("KONG_HTTPS_PORT=8443\n"));
        assert!(rendered.contains("DASHBOARD_PASSWORD=dashboard_password-3\n"));
    }

    #[test]
    fn sign_policy_uses_effective_jwt_secret() {
        let mut env = EnvFile::parse(EXAMPLE);
        env.set("JWT_SECRET", "kept");
        let mut src = Counter(0);
        materialize(
            &mut env,
            "api.example.com",
            KongPorts::default(),
            ApiKeyPolicy::SignFromJwtSecret,
            &mut src,
            1_700_000_000,
        )
        .unwrap();
        let expected = sign_api_key(ApiKeyRole::Anon, "kept", 1_700_000_000).unwrap();
        assert_eq!(env.get("ANON_KEY"), Some(expected.as_str()));
    }

    #[test]
    fn quoted_placeholder_is_still_insecure() {
        let mut env = EnvFile::parse(&format!(
            "JWT_SECRET=\"{}\"\nPOSTGRES_PASSWORD='{}'\nDASHBOARD_PASSWORD=\"mine\"\n",
            SecretKind::JwtSecret.insecure_placeholder(),
            SecretKind::PostgresPassword.insecure_placeholder(),
        ));
        let mut src = Counter(0);
        let report = run(&mut env, "api.example.com", &mut src);

        assert_eq!(
            report.generated,
            vec![SecretKind::PostgresPassword, SecretKind::JwtSecret]
        );
        assert_eq!(report.preserved, vec![SecretKind::DashboardPassword]);
        assert_eq!(env.get("JWT_SECRET"), Some("jwt_secret-2"));
        assert_eq!(env.get("DASHBOARD_PASSWORD"), Some("\"mine\""));
    }

    #[test]
    fn sign_policy_strips_quotes_from_jwt_secret() {
        let mut env = EnvFile::parse("JWT_SECRET=\"kept\"\n");
        let mut src = Counter(0);
        materialize(
            &mut env,
            "api.example.com",
            KongPorts::default(),
            ApiKeyPolicy::SignFromJwtSecret,
            &mut src,
            1_700_000_000,
        )
        .unwrap();
        let expected = sign_api_key(ApiKeyRole::ServiceRole, "kept", 1_700_000_000).unwrap();
        assert_eq!(env.get("SERVICE_ROLE_KEY"), Some(expected.as_str()));
    }
}
