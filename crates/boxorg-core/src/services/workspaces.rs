use boxorg_domain::{DomainError, MemberRole, Membership, Workspace};
use chrono::Utc;
use log::debug;
use uuid::Uuid;

use crate::errors::OrganizerError;
use crate::store::{NewWorkspace, RowStore};

pub struct WorkspaceService<'a, S: RowStore> {
    store: &'a S,
}

impl<'a, S: RowStore> WorkspaceService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Crea el workspace y la membresía `owner` de quien lo crea.
    pub fn create(&self, owner_id: Uuid, name: &str) -> Result<Workspace, OrganizerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::MissingField("name").into());
        }
        self.store.transaction(|| {
                      let workspace = self.store.insert_workspace(NewWorkspace { id: Uuid::new_v4(),
                                                                                 name: name.to_string(),
                                                                                 owner_id })?;
                      self.store.insert_member(Membership { workspace_id: workspace.id,
                                                            user_id: owner_id,
                                                            role: MemberRole::Owner,
                                                            created_at: Utc::now() })?;
                      debug!("workspace create:done id={} owner_id={owner_id}", workspace.id);
                      Ok(workspace)
                  })
    }

    pub fn get(&self, workspace_id: Uuid) -> Result<Workspace, OrganizerError> {
        self.store
            .get_workspace(workspace_id)?
            .ok_or(OrganizerError::WorkspaceNotFound(workspace_id))
    }

    /// Workspaces en los que el usuario tiene membresía, por fecha de alta.
    pub fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Workspace>, OrganizerError> {
        let mut workspaces = Vec::new();
        for membership in self.store.list_memberships_for_user(user_id)? {
            if let Some(workspace) = self.store.get_workspace(membership.workspace_id)? {
                workspaces.push(workspace);
            }
        }
        workspaces.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workspaces)
    }
}
