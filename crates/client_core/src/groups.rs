use std::sync::Arc;

use shared::{
    domain::{GroupId, GroupRole, MemberId, UserId},
    protocol::{AddMemberRequest, Group, GroupMember, GroupRequest, PhotoResponse},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    error::ClientError,
    status::{StatusTracker, SyncStatus},
    transport::{GatewayError, GroupGateway, PhotoUpload},
};

#[derive(Default)]
struct GroupState {
    groups: Vec<Group>,
    current: Option<Group>,
    members: Vec<GroupMember>,
}

pub struct GroupDirectory {
    gateway: Arc<dyn GroupGateway>,
    inner: Mutex<GroupState>,
    status: StatusTracker,
}

impl GroupDirectory {
    pub fn new(gateway: Arc<dyn GroupGateway>) -> Self {
        Self {
            gateway,
            inner: Mutex::new(GroupState::default()),
            status: StatusTracker::default(),
        }
    }

    pub async fn fetch_groups(&self) -> Result<Vec<Group>, ClientError> {
        let _in_flight = self.status.begin();
        let groups = self
            .gateway
            .list_groups()
            .await
            .map_err(|err| self.fail(err, "Failed to fetch groups"))?;
        self.inner.lock().await.groups = groups.clone();
        Ok(groups)
    }

    pub async fn fetch_group(&self, id: &GroupId) -> Result<Group, ClientError> {
        let _in_flight = self.status.begin();
        let group = self
            .gateway
            .get_group(id)
            .await
            .map_err(|err| self.fail(err, "Failed to fetch group"))?;
        self.inner.lock().await.current = Some(group.clone());
        Ok(group)
    }

    pub async fn fetch_members(&self, id: &GroupId) -> Result<Vec<GroupMember>, ClientError> {
        let _in_flight = self.status.begin();
        let members = self
            .gateway
            .list_members(id)
            .await
            .map_err(|err| self.fail(err, "Failed to fetch group members"))?;
        self.inner.lock().await.members = members.clone();
        Ok(members)
    }

    pub async fn create(&self, request: &GroupRequest) -> Result<Group, ClientError> {
        let _in_flight = self.status.begin();
        let group = self
            .gateway
            .create_group(request)
            .await
            .map_err(|err| self.fail(err, "Failed to create group"))?;
        self.inner.lock().await.groups.push(group.clone());
        Ok(group)
    }

    pub async fn update(&self, id: &GroupId, request: &GroupRequest) -> Result<Group, ClientError> {
        let _in_flight = self.status.begin();
        let updated = self
            .gateway
            .update_group(id, request)
            .await
            .map_err(|err| self.fail(err, "Failed to update group"))?;

        let mut state = self.inner.lock().await;
        if let Some(slot) = state.groups.iter_mut().find(|g| g.id == updated.id) {
            *slot = updated.clone();
        }
        if state.current.as_ref().is_some_and(|g| g.id == updated.id) {
            state.current = Some(updated.clone());
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &GroupId) -> Result<(), ClientError> {
        let _in_flight = self.status.begin();
        self.gateway
            .delete_group(id)
            .await
            .map_err(|err| self.fail(err, "Failed to delete group"))?;

        let mut state = self.inner.lock().await;
        state.groups.retain(|g| &g.id != id);
        if state.current.as_ref().is_some_and(|g| &g.id == id) {
            state.current = None;
        }
        Ok(())
    }

    /// Adds `user_id` to the group; `role` defaults to [`GroupRole::Member`].
    pub async fn add_member(
        &self,
        id: &GroupId,
        user_id: UserId,
        role: Option<GroupRole>,
    ) -> Result<GroupMember, ClientError> {
        let _in_flight = self.status.begin();
        let request = AddMemberRequest {
            user_id,
            role: role.unwrap_or_default(),
        };
        let member = self
            .gateway
            .add_member(id, &request)
            .await
            .map_err(|err| self.fail(err, "Failed to add member to group"))?;
        self.inner.lock().await.members.push(member.clone());
        Ok(member)
    }

    pub async fn remove_member(&self, id: &GroupId, member_id: &MemberId) -> Result<(), ClientError> {
        let _in_flight = self.status.begin();
        self.gateway
            .remove_member(id, member_id)
            .await
            .map_err(|err| self.fail(err, "Failed to remove member from group"))?;
        self.inner
            .lock()
            .await
            .members
            .retain(|m| &m.id != member_id);
        Ok(())
    }

    /// Changes a member's role, then refreshes the member list from the server.
    pub async fn update_member_role(
        &self,
        id: &GroupId,
        member_id: &MemberId,
        role: GroupRole,
    ) -> Result<Vec<GroupMember>, ClientError> {
        {
            let _in_flight = self.status.begin();
            self.gateway
                .update_member_role(id, member_id, role)
                .await
                .map_err(|err| self.fail(err, "Failed to update member role"))?;
        }
        self.fetch_members(id).await
    }

    /// Leaves the group and forgets it locally.
    pub async fn leave(&self, id: &GroupId) -> Result<(), ClientError> {
        let _in_flight = self.status.begin();
        self.gateway
            .leave_group(id)
            .await
            .map_err(|err| self.fail(err, "Failed to leave group"))?;

        let mut state = self.inner.lock().await;
        state.groups.retain(|g| &g.id != id);
        if state.current.as_ref().is_some_and(|g| &g.id == id) {
            state.current = None;
            state.members.clear();
        }
        Ok(())
    }

    pub async fn rename(&self, id: &GroupId, name: &str) -> Result<(), ClientError> {
        let _in_flight = self.status.begin();
        self.gateway
            .set_group_name(id, name)
            .await
            .map_err(|err| self.fail(err, "Failed to update group name"))?;
        self.edit_cached(id, |group| group.name = name.to_string())
            .await;
        Ok(())
    }

    pub async fn set_photo(
        &self,
        id: &GroupId,
        photo: PhotoUpload,
    ) -> Result<PhotoResponse, ClientError> {
        let _in_flight = self.status.begin();
        let response = self
            .gateway
            .set_group_photo(id, photo)
            .await
            .map_err(|err| self.fail(err, "Failed to update group photo"))?;
        let url = response.photo.clone();
        self.edit_cached(id, move |group| group.photo = Some(url.clone()))
            .await;
        Ok(response)
    }

    pub async fn groups(&self) -> Vec<Group> {
        self.inner.lock().await.groups.clone()
    }

    pub async fn current(&self) -> Option<Group> {
        self.inner.lock().await.current.clone()
    }

    pub async fn members(&self) -> Vec<GroupMember> {
        self.inner.lock().await.members.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.status()
    }

    async fn edit_cached(&self, id: &GroupId, edit: impl Fn(&mut Group)) {
        let mut state = self.inner.lock().await;
        if let Some(group) = state.groups.iter_mut().find(|g| &g.id == id) {
            edit(group);
        }
        if let Some(group) = state.current.as_mut().filter(|g| &g.id == id) {
            edit(group);
        }
    }

    fn fail(&self, err: GatewayError, fallback: &str) -> ClientError {
        warn!("groups: {fallback}: {err}");
        self.status
            .fail(err.failure_message().unwrap_or(fallback).to_string());
        err.into()
    }
}

#[cfg(test)]
#[path = "tests/groups_tests.rs"]
mod tests;
