//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::arbiter::Group;
use crate::debug::Debug;
use crate::election::ElectionId;
use crate::error::Code;
use crate::session::SessionId;
use crate::{DeviceId, RoleId};

pub type NotificationSender = UnboundedSender<ArbitrationNotification>;
pub type NotificationReceiver = UnboundedReceiver<ArbitrationNotification>;

/// Arbitration response/advisory sent over a stream channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArbitrationNotification {
    pub device_id: DeviceId,
    pub role_id: RoleId,
    // Role config of the primary, if there's one.
    pub role_config: Option<Bytes>,
    // Highest election ID of the group. Absent when there's no primary.
    pub election_id: Option<ElectionId>,
    pub status: Code,
}

// ===== global functions =====

// Builds the notification for the given group member.
pub(crate) fn advisory(
    group: &Group,
    session_id: SessionId,
) -> ArbitrationNotification {
    let primary = group.primary();
    let status = match primary {
        Some((primary_id, _)) if primary_id == session_id => Code::Ok,
        Some(_) => Code::AlreadyExists,
        None => Code::NotFound,
    };
    let role_config = primary
        .and_then(|(primary_id, _)| group.member(primary_id))
        .and_then(|member| member.role_config.clone());

    ArbitrationNotification {
        device_id: group.key.device_id,
        role_id: group.key.role_id,
        role_config,
        election_id: primary.and(group.highest()),
        status,
    }
}

// Sends the current group state to a single member.
pub(crate) fn send(group: &Group, session_id: SessionId) {
    if let Some(member) = group.member(session_id) {
        let notification = advisory(group, session_id);
        Debug::NotificationTx(session_id, &notification).log();
        // The receiver is gone only when the stream is being torn down, in
        // which case the session is about to leave the group anyway.
        let _ = member.tx.send(notification);
    }
}

// Sends the current group state to every member.
pub(crate) fn broadcast(group: &Group) {
    for session_id in group.member_ids() {
        send(group, session_id);
    }
}
