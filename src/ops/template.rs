use crate::ops::address::AddressKind;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PLACEHOLDER: &str = "{{SUBDOMAIN_ADDRESS}}";
pub const SECURE_TEMPLATE_FILE: &str = "nginx-secure.conf.template";
pub const INSECURE_TEMPLATE_FILE: &str = "nginx-insecure.conf.template";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("nginx template not found: {0}")]
    Missing(PathBuf),
    #[error("failed to read nginx template {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("nginx template {0} does not contain the {{{{SUBDOMAIN_ADDRESS}}}} placeholder")]
    NoPlaceholder(PathBuf),
}

/// Which proxy config variant a server gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVariant {
    Secure,
    Insecure,
}

impl TemplateVariant {
    pub fn for_address(kind: AddressKind) -> Self {
        match kind {
            AddressKind::Ipv4 => Self::Insecure,
            AddressKind::Domain => Self::Secure,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Secure => SECURE_TEMPLATE_FILE,
            Self::Insecure => INSECURE_TEMPLATE_FILE,
        }
    }
}

impl std::fmt::Display for TemplateVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secure => write!(f, "secure"),
            Self::Insecure => write!(f, "insecure"),
        }
    }
}

/// Both nginx templates, loaded once per run.
#[derive(Debug, Clone)]
pub struct NginxTemplates {
    pub secure: String,
    pub insecure: String,
}

impl NginxTemplates {
    pub fn load(dir: &Path) -> Result<Self, TemplateError> {
        Ok(Self {
            secure: read_template(&dir.join(SECURE_TEMPLATE_FILE))?,
            insecure: read_template(&dir.join(INSECURE_TEMPLATE_FILE))?,
        })
    }

    pub fn get(&self, variant: TemplateVariant) -> &str {
        match variant {
            TemplateVariant::Secure => &self.secure,
            TemplateVariant::Insecure => &self.insecure,
        }
    }

    /// Select by address shape and render for that address.
    pub fn render_for(&self, address: &str) -> (TemplateVariant, String) {
        let variant = TemplateVariant::for_address(AddressKind::classify(address));
        let rendered = render(self.get(variant), &[(PLACEHOLDER, address)]);
        (variant, rendered)
    }
}

fn read_template(path: &Path) -> Result<String, TemplateError> {
    if !path.exists() {
        return Err(TemplateError::Missing(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| TemplateError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    if !content.contains(PLACEHOLDER) {
        return Err(TemplateError::NoPlaceholder(path.to_path_buf()));
    }
    Ok(content)
}

/// Literal substitution of every occurrence of each token. No escaping, no recursion.
pub fn render(template: &str, substitutions: &[(&str, &str)]) -> String {
    substitutions
        .iter()
        .fold(template.to_string(), |acc, (token, value)| {
            acc.replace(token, value)
        })
}
