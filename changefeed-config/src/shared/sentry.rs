use secrecy::SecretString;
use serde::Deserialize;

/// Sentry error reporting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SentryConfig {
    /// Project DSN, treated as a secret.
    pub dsn: SecretString,
}
