use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Identity resolved from a session token
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Role a user holds on a project
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccessRole {
    Owner,
    Editor,
    Viewer,
    None,
}

impl AccessRole {
    /// Parse a stored role name. Anything unrecognised grants nothing.
    pub fn from_db(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "owner" => AccessRole::Owner,
            "editor" => AccessRole::Editor,
            "viewer" => AccessRole::Viewer,
            _ => AccessRole::None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, AccessRole::Viewer)
    }

    pub fn grants_access(&self) -> bool {
        !matches!(self, AccessRole::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRole::Owner => "owner",
            AccessRole::Editor => "editor",
            AccessRole::Viewer => "viewer",
            AccessRole::None => "none",
        }
    }
}

impl std::fmt::Display for AccessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
