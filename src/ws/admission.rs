use tracing::{info, warn};

use crate::models::{AccessRole, User};
use crate::services::access_resolver::AccessResolver;

use super::error::AdmissionError;
use super::room_name::RoomScope;

/// Outcome of a successful admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub scope: RoomScope,
    pub user: Option<User>,
    pub role: AccessRole,
}

impl Admitted {
    pub fn user_id(&self) -> Option<String> {
        self.user.as_ref().map(|u| u.id.clone())
    }
}

/// Decide whether a connection may join `room_name`, and with which role.
///
/// Unscoped rooms are open to anyone as editors without touching the
/// resolver. Scoped rooms need a session that resolves to a user with a role
/// on the project. Resolver outages fail closed as `AuthenticationRequired`.
pub async fn admit(
    room_name: &str,
    token: Option<&str>,
    resolver: &dyn AccessResolver,
) -> Result<Admitted, AdmissionError> {
    let scope = RoomScope::parse(room_name);
    let project_id = match &scope {
        RoomScope::Unscoped => {
            return Ok(Admitted {
                scope,
                user: None,
                role: AccessRole::Editor,
            });
        }
        RoomScope::Scoped { project_id, .. } => project_id.clone(),
    };

    let token = token.ok_or_else(|| {
        info!("Rejecting connection to {}: no session token", room_name);
        AdmissionError::AuthenticationRequired
    })?;

    let user = match resolver.resolve_user(token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            info!("Rejecting connection to {}: session does not resolve to a user", room_name);
            return Err(AdmissionError::AuthenticationRequired);
        }
        Err(e) => {
            warn!("Rejecting connection to {}: {}", room_name, e);
            return Err(AdmissionError::AuthenticationRequired);
        }
    };

    let role = match resolver.resolve_role(&user, &project_id).await {
        Ok(role) => role,
        Err(e) => {
            warn!("Rejecting connection to {} for user {}: {}", room_name, user.id, e);
            return Err(AdmissionError::AuthenticationRequired);
        }
    };

    if !role.grants_access() {
        info!("Rejecting connection to {}: user {} has no role on project {}", room_name, user.id, project_id);
        return Err(AdmissionError::AccessDenied);
    }

    info!("Admitted user {} to {} as {}", user.id, room_name, role);
    Ok(Admitted {
        scope,
        user: Some(user),
        role,
    })
}
