use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distr::Alphanumeric;
use rand::Rng;
use sha2::Sha256;

/// Secrets the provisioner may generate for a fresh `.env`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    PostgresPassword,
    JwtSecret,
    DashboardPassword,
}

impl SecretKind {
    pub fn env_key(self) -> &'static str {
        match self {
            Self::PostgresPassword => "POSTGRES_PASSWORD",
            Self::JwtSecret => "JWT_SECRET",
            Self::DashboardPassword => "DASHBOARD_PASSWORD",
        }
    }

    /// Value shipped in the upstream `.env.example`. Treated as "not yet set".
    pub fn insecure_placeholder(self) -> &'static str {
        match self {
            Self::PostgresPassword => "your-super-secret-and-long-postgres-password",
            Self::JwtSecret => "your-super-secret-jwt-token-with-at-least-32-characters-long",
            Self::DashboardPassword => "this_password_is_insecure_and_should_be_updated",
        }
    }

    pub const ALL: [SecretKind; 3] = [
        SecretKind::PostgresPassword,
        SecretKind::JwtSecret,
        SecretKind::DashboardPassword,
    ];
}

pub trait SecretSource {
    fn generate(&mut self, kind: SecretKind) -> String;
}

/// Thread-local CSPRNG from `rand`.
#[derive(Debug, Default)]
pub struct OsSecretSource;

impl SecretSource for OsSecretSource {
    fn generate(&mut self, kind: SecretKind) -> String {
        let mut rng = rand::rng();
        match kind {
            SecretKind::PostgresPassword => {
                let mut bytes = [0u8; 16];
                rng.fill(&mut bytes);
                hex::encode(bytes)
            }
            SecretKind::JwtSecret => {
                let mut bytes = [0u8; 32];
                rng.fill(&mut bytes);
                hex::encode(bytes)
            }
            SecretKind::DashboardPassword => (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(24)
                .map(char::from)
                .collect(),
        }
    }
}

/// Role claim of the two gateway API keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyRole {
    Anon,
    ServiceRole,
}

impl ApiKeyRole {
    pub fn env_key(self) -> &'static str {
        match self {
            Self::Anon => "ANON_KEY",
            Self::ServiceRole => "SERVICE_ROLE_KEY",
        }
    }

    pub fn placeholder(self) -> &'static str {
        match self {
            Self::Anon => "your-anon-key",
            Self::ServiceRole => "your-service-role-key",
        }
    }

    fn claim(self) -> &'static str {
        match self {
            Self::Anon => "anon",
            Self::ServiceRole => "service_role",
        }
    }

    pub const ALL: [ApiKeyRole; 2] = [ApiKeyRole::Anon, ApiKeyRole::ServiceRole];
}

const API_KEY_LIFETIME_SECS: i64 = 5 * 365 * 24 * 60 * 60;

/// HS256 JWT for `role`, signed with the stack's `JWT_SECRET`.
pub fn sign_api_key(role: ApiKeyRole, jwt_secret: &str, issued_at: i64) -> Result<String> {
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
    let claims = serde_json::json!({
        "role": role.claim(),
        "iss": "supabase",
        "iat": issued_at,
        "exp": issued_at + API_KEY_LIFETIME_SECS,
    });

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
    );

    let mut mac = Hmac::<Sha256>::new_from_slice(jwt_secret.as_bytes())
        .map_err(|e| anyhow!("invalid JWT secret: {}", e))?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}
