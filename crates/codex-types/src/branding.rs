//! White-label branding settings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of the application name.
const MAX_APP_NAME_LEN: usize = 80;
/// Maximum length of free-text branding fields.
const MAX_TEXT_LEN: usize = 500;

/// Branding shown by the client and stamped onto exported PDFs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branding {
    /// Product name (e.g. "CodeXAlpha", "LightOS").
    pub app_name: String,
    /// Short line shown under the name.
    #[serde(default)]
    pub tagline: Option<String>,
    /// Absolute `http(s)` URL of the logo image.
    #[serde(default)]
    pub logo_url: Option<String>,
    /// Accent colour as `#RRGGBB`.
    pub primary_color: String,
    /// Contact address shown in the footer.
    #[serde(default)]
    pub support_email: Option<String>,
    /// Footer line for exported documents.
    #[serde(default)]
    pub footer_text: Option<String>,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            app_name: "CodeXAlpha".to_string(),
            tagline: Some("Clarity for coaching businesses".to_string()),
            logo_url: None,
            primary_color: "#6D28D9".to_string(),
            support_email: None,
            footer_text: None,
        }
    }
}

/// A branding field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid branding: {0}")]
pub struct BrandingError(pub String);

fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}

impl Branding {
    /// Validates every field.
    ///
    /// # Errors
    ///
    /// Returns [`BrandingError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), BrandingError> {
        let name = self.app_name.trim();
        if name.is_empty() || name.chars().count() > MAX_APP_NAME_LEN {
            return Err(BrandingError(format!(
                "app_name must be 1..={} characters",
                MAX_APP_NAME_LEN
            )));
        }
        if !is_hex_color(&self.primary_color) {
            return Err(BrandingError(format!(
                "primary_color must look like #RRGGBB, got {}",
                self.primary_color
            )));
        }
        if let Some(ref logo) = self.logo_url {
            let parsed = url::Url::parse(logo)
                .map_err(|e| BrandingError(format!("logo_url is not a valid URL: {}", e)))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(BrandingError("logo_url must use http or https".to_string()));
            }
        }
        if let Some(ref email) = self.support_email {
            let valid = email
                .split_once('@')
                .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
                .unwrap_or(false);
            if !valid {
                return Err(BrandingError(format!("support_email is invalid: {}", email)));
            }
        }
        for (field, value) in [("tagline", &self.tagline), ("footer_text", &self.footer_text)] {
            if let Some(v) = value {
                if v.chars().count() > MAX_TEXT_LEN {
                    return Err(BrandingError(format!(
                        "{} exceeds {} characters",
                        field, MAX_TEXT_LEN
                    )));
                }
            }
        }
        Ok(())
    }
}
