//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use bytes::Bytes;
use derive_new::new;

use crate::debug::Debug;
use crate::device::Device;
use crate::election::ElectionId;
use crate::engine::EngineInner;
use crate::error::Error;
use crate::notification::{self, NotificationSender};
use crate::session::{Session, SessionId};
use crate::{DeviceId, RoleId};

// Key of an arbitration group.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(new)]
pub struct GroupKey {
    pub device_id: DeviceId,
    pub role_id: RoleId,
}

// Arbitration update received over a stream channel.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(new)]
pub struct ArbitrationUpdate {
    pub device_id: DeviceId,
    pub role_id: RoleId,
    pub role_config: Option<Bytes>,
    pub election_id: Option<ElectionId>,
}

// Result of a successfully processed arbitration update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Arbitration {
    // The update was applied.
    Accepted {
        role: SessionRole,
        // Whether the group's primary or highest election ID changed.
        changed: bool,
    },
    // The election ID is already used by a backup. Nothing was changed and
    // no notification was sent.
    Ignored,
}

// Role of a session within its arbitration group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionRole {
    Unconnected,
    BackupNoElection,
    Backup,
    Primary,
    Terminated,
}

#[derive(Debug, new)]
pub(crate) struct Member {
    pub election_id: Option<ElectionId>,
    pub role_config: Option<Bytes>,
    pub tx: NotificationSender,
}

#[derive(Debug)]
pub struct Group {
    pub key: GroupKey,
    // Members ordered by session ID.
    members: BTreeMap<SessionId, Member>,
    // Current primary and its election ID.
    primary: Option<(SessionId, ElectionId)>,
    // Set once the last member left and the group was unlinked.
    pub(crate) removed: bool,
}

// ===== impl Group =====

impl Group {
    pub(crate) fn new(key: GroupKey) -> Group {
        Debug::GroupCreate(&key).log();

        Group {
            key,
            members: Default::default(),
            primary: None,
            removed: false,
        }
    }

    pub fn primary(&self) -> Option<(SessionId, ElectionId)> {
        self.primary
    }

    // Highest election ID among the members.
    //
    // The primary always holds the highest election ID, so this is unset if
    // and only if no member has sent an election ID.
    pub fn highest(&self) -> Option<ElectionId> {
        self.primary.map(|(_, election_id)| election_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn role_of(&self, session_id: SessionId) -> SessionRole {
        match self.members.get(&session_id) {
            None => SessionRole::Unconnected,
            Some(_) if self.is_primary(session_id) => SessionRole::Primary,
            Some(member) if member.election_id.is_none() => {
                SessionRole::BackupNoElection
            }
            Some(_) => SessionRole::Backup,
        }
    }

    pub(crate) fn member(&self, session_id: SessionId) -> Option<&Member> {
        self.members.get(&session_id)
    }

    pub(crate) fn member_ids(&self) -> Vec<SessionId> {
        self.members.keys().copied().collect()
    }

    fn is_primary(&self, session_id: SessionId) -> bool {
        self.primary.is_some_and(|(primary_id, _)| primary_id == session_id)
    }

    // Returns another member already using the given election ID.
    fn election_id_owner(
        &self,
        session_id: SessionId,
        election_id: ElectionId,
    ) -> Option<SessionId> {
        self.members
            .iter()
            .find(|(id, member)| {
                **id != session_id && member.election_id == Some(election_id)
            })
            .map(|(id, _)| *id)
    }

    fn insert(&mut self, session_id: SessionId, member: Member) {
        self.members.insert(session_id, member);
    }

    fn remove(&mut self, session_id: SessionId) -> Option<Member> {
        self.members.remove(&session_id)
    }

    // Recomputes the primary as the member with the highest election ID.
    //
    // Returns whether the (primary, highest election ID) pair has changed.
    fn elect(&mut self) -> bool {
        let old_primary = self.primary;
        self.primary = self
            .members
            .iter()
            .filter_map(|(id, member)| {
                member.election_id.map(|election_id| (*id, election_id))
            })
            .max_by_key(|(_, election_id)| *election_id);

        if self.primary == old_primary {
            return false;
        }

        let old_id = old_primary.map(|(id, _)| id);
        let new_id = self.primary.map(|(id, _)| id);
        if old_id != new_id {
            Debug::PrimaryChange(&self.key, old_id, new_id).log();
        }
        true
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        Debug::GroupDelete(&self.key).log();
    }
}

// ===== global functions =====

// Processes an arbitration update received on the given session.
//
// Fatal errors terminate the session, which also removes it from its group.
pub(crate) fn arbitrate(
    engine: &EngineInner,
    session: &mut Session,
    update: ArbitrationUpdate,
) -> Result<Arbitration, Error> {
    Debug::ArbitrationRx(session.id(), &update).log();

    let result = process_update(engine, session, update);
    if let Err(error) = &result
        && error.is_fatal()
    {
        session.terminate();
    }
    result
}

fn process_update(
    engine: &EngineInner,
    session: &mut Session,
    update: ArbitrationUpdate,
) -> Result<Arbitration, Error> {
    if session.is_terminated() {
        return Err(Error::SessionTerminated(session.id()));
    }

    let device = engine.device(update.device_id)?;
    if update.election_id.is_some_and(|election_id| election_id.is_zero()) {
        return Err(Error::ZeroElectionId);
    }

    // Validate the update against the parameters established earlier.
    match &session.binding {
        Some(key) => {
            if key.device_id != update.device_id {
                return Err(Error::DeviceIdMismatch(
                    key.device_id,
                    update.device_id,
                ));
            }
            if key.role_id != update.role_id {
                return Err(Error::RoleIdMismatch(key.role_id, update.role_id));
            }
            if update.role_config != session.role_config
                && update.election_id == session.election_id
            {
                return Err(Error::RoleConfigMismatch(update.election_id));
            }
        }
        None => device.reserve_session()?,
    }

    let new_session = session.binding.is_none();
    let session_id = session.id();
    let tx = session.tx.clone();
    let result = device.with_group(update.role_id, |group| {
        update_group(group, session_id, tx, &update, new_session)
    });

    match result {
        Ok(arbitration) => {
            session.binding = Some(GroupKey::new(device.id, update.role_id));
            if arbitration != Arbitration::Ignored {
                session.election_id = update.election_id;
                session.role_config = update.role_config;
            }
            Ok(arbitration)
        }
        Err(error) => {
            if new_session {
                device.release_session();
            }
            Err(error)
        }
    }
}

fn update_group(
    group: &mut Group,
    session_id: SessionId,
    tx: NotificationSender,
    update: &ArbitrationUpdate,
    new_session: bool,
) -> Result<Arbitration, Error> {
    if let Some(election_id) = update.election_id
        && let Some(owner_id) = group.election_id_owner(session_id, election_id)
    {
        // Colliding with the primary is a protocol violation.
        if group.is_primary(owner_id) {
            return Err(Error::DuplicateElectionId(election_id));
        }

        // Colliding with a backup is a no-op. A new session still joins the
        // group, without an election ID.
        if new_session {
            group.insert(session_id, Member::new(None, None, tx));
        }
        Debug::ArbitrationIgnored(session_id, &group.key, election_id).log();
        return Ok(Arbitration::Ignored);
    }

    let member =
        Member::new(update.election_id, update.role_config.clone(), tx);
    group.insert(session_id, member);

    let changed = group.elect();
    if changed {
        notification::broadcast(group);
    } else {
        notification::send(group, session_id);
    }

    Ok(Arbitration::Accepted {
        role: group.role_of(session_id),
        changed,
    })
}

// Removes a session from its arbitration group.
pub(crate) fn leave(device: &Device, role_id: RoleId, session_id: SessionId) {
    let removed = device.with_existing_group(role_id, |group| {
        let removed = group.remove(session_id).is_some();
        if removed && group.elect() {
            notification::broadcast(group);
        }
        removed
    });

    if removed == Some(true) {
        device.release_session();
    }
}

// Returns the role of the given session.
pub(crate) fn session_role(
    engine: &EngineInner,
    session: &Session,
) -> SessionRole {
    if session.is_terminated() {
        return SessionRole::Terminated;
    }
    let Some(key) = session.binding() else {
        return SessionRole::Unconnected;
    };
    let Ok(device) = engine.device(key.device_id) else {
        return SessionRole::Unconnected;
    };
    device
        .with_existing_group(key.role_id, |group| group.role_of(session.id()))
        .unwrap_or(SessionRole::Unconnected)
}
