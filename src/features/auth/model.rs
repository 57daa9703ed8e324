use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Identity of the caller, resolved from a validated bearer token.
///
/// `sub` is the storage owner id used for session ownership and quota
/// accounting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AuthenticatedUser {
    /// Check if user has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Storage owner id for quota accounting
    pub fn owner_id(&self) -> &str {
        &self.sub
    }
}

/// Claims accepted in access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}
