use std::fmt;
use std::sync::Arc;
use tracing::info;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[derive(Debug, thiserror::Error)]
#[error("Google credentials error: {0}")]
pub struct CredentialsError(String);

/// Source of bearer tokens for Vertex AI and BigQuery calls.
#[derive(Clone)]
pub enum Credentials {
    /// A fixed access token, used as is.
    Static(String),
    /// Application Default Credentials.
    Google(Arc<dyn gcp_auth::TokenProvider>),
}

impl Credentials {
    pub async fn discover() -> Result<Self, CredentialsError> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| CredentialsError(e.to_string()))?;
        info!("Using Google application default credentials");
        Ok(Credentials::Google(provider))
    }

    pub async fn bearer_token(&self) -> Result<String, CredentialsError> {
        match self {
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::Google(provider) => {
                let token = provider
                    .token(&[CLOUD_PLATFORM_SCOPE])
                    .await
                    .map_err(|e| CredentialsError(e.to_string()))?;
                Ok(token.as_str().to_string())
            }
        }
    }

    /// The project the credentials belong to, when they carry one.
    pub async fn project_id(&self) -> Option<String> {
        match self {
            Credentials::Static(_) => None,
            Credentials::Google(provider) => provider.project_id().await.ok().map(|p| p.to_string()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Static(_) => f.write_str("Credentials::Static(..)"),
            Credentials::Google(_) => f.write_str("Credentials::Google(..)"),
        }
    }
}
