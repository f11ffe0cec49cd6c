use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::StreamContext;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Selection {
    business_id: Option<String>,
    departments: Vec<String>,
    roles: Vec<String>,
    playbooks: Vec<String>,
    project_id: Option<String>,
}

/// Business, department, role, playbook and project choices that scope
/// every outgoing message.
///
/// Shared by handle: the session reads it when a turn starts, whatever front
/// end is in use writes it.
#[derive(Clone, Debug, Default)]
pub struct ContextSelectionStore {
    inner: Arc<RwLock<Selection>>,
}

impl ContextSelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn business_id(&self) -> Option<String> {
        self.inner.read().business_id.clone()
    }

    /// Switching business drops selections that belonged to the old one.
    pub fn set_business_id(&self, business_id: Option<String>) {
        let mut selection = self.inner.write();
        if selection.business_id != business_id {
            *selection = Selection {
                business_id,
                ..Default::default()
            };
        }
    }

    pub fn departments(&self) -> Vec<String> {
        self.inner.read().departments.clone()
    }

    pub fn set_departments(&self, departments: Vec<String>) {
        self.inner.write().departments = departments;
    }

    pub fn roles(&self) -> Vec<String> {
        self.inner.read().roles.clone()
    }

    pub fn set_roles(&self, roles: Vec<String>) {
        self.inner.write().roles = roles;
    }

    pub fn playbooks(&self) -> Vec<String> {
        self.inner.read().playbooks.clone()
    }

    pub fn set_playbooks(&self, playbooks: Vec<String>) {
        self.inner.write().playbooks = playbooks;
    }

    pub fn project_id(&self) -> Option<String> {
        self.inner.read().project_id.clone()
    }

    pub fn set_project_id(&self, project_id: Option<String>) {
        self.inner.write().project_id = project_id;
    }

    pub fn clear(&self) {
        *self.inner.write() = Selection::default();
    }

    /// Snapshot the current selection as request context.
    pub fn to_stream_context(&self, attachment_ids: Vec<String>) -> StreamContext {
        let selection = self.inner.read();
        StreamContext {
            business_id: selection.business_id.clone(),
            departments: selection.departments.clone(),
            roles: selection.roles.clone(),
            playbooks: selection.playbooks.clone(),
            project_id: selection.project_id.clone(),
            attachment_ids,
        }
    }
}
