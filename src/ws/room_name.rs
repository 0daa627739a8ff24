/// Scope of a room, derived from its name.
///
/// Names of the form `project:<projectId>:file:<fileId>` are bound to a
/// project and go through access control. Every other name is an open room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomScope {
    Scoped { project_id: String, file_id: String },
    Unscoped,
}

impl RoomScope {
    pub fn parse(name: &str) -> Self {
        let mut parts = name.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("project"), Some(project_id), Some("file"), Some(file_id), None)
                if !project_id.is_empty() && !file_id.is_empty() =>
            {
                RoomScope::Scoped {
                    project_id: project_id.to_string(),
                    file_id: file_id.to_string(),
                }
            }
            _ => RoomScope::Unscoped,
        }
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self, RoomScope::Scoped { .. })
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            RoomScope::Scoped { project_id, .. } => Some(project_id),
            RoomScope::Unscoped => None,
        }
    }
}
