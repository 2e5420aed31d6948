//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use chrono::TimeDelta;
use tracing::{debug, debug_span};

use crate::DeviceId;
use crate::arbiter::{ArbitrationUpdate, GroupKey};
use crate::election::ElectionId;
use crate::notification::ArbitrationNotification;
use crate::pipeline::Action;
use crate::session::SessionId;

// Engine debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    SessionCreate(SessionId),
    SessionDelete(SessionId, TimeDelta),
    SessionTerminate(SessionId),
    ArbitrationRx(SessionId, &'a ArbitrationUpdate),
    ArbitrationIgnored(SessionId, &'a GroupKey, ElectionId),
    GroupCreate(&'a GroupKey),
    GroupDelete(&'a GroupKey),
    PrimaryChange(&'a GroupKey, Option<SessionId>, Option<SessionId>),
    NotificationTx(SessionId, &'a ArbitrationNotification),
    PipelineAction(DeviceId, Action),
    PipelineCommit(DeviceId, u64, u64),
    JournalReplay(DeviceId, usize, usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::SessionCreate(session_id)
            | Debug::SessionTerminate(session_id) => {
                debug_span!("session", id = %session_id).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::SessionDelete(session_id, uptime) => {
                debug_span!("session", id = %session_id).in_scope(|| {
                    debug!(%uptime, "{}", self);
                });
            }
            Debug::ArbitrationRx(session_id, update) => {
                debug_span!("session", id = %session_id).in_scope(|| {
                    debug!(
                        device_id = %update.device_id,
                        role_id = %update.role_id,
                        election_id = ?update.election_id,
                        "{}",
                        self
                    );
                });
            }
            Debug::ArbitrationIgnored(session_id, key, election_id) => {
                debug_span!(
                    "group",
                    device_id = %key.device_id,
                    role_id = %key.role_id
                )
                .in_scope(|| {
                    debug!(%session_id, %election_id, "{}", self);
                });
            }
            Debug::GroupCreate(key) | Debug::GroupDelete(key) => {
                debug_span!(
                    "group",
                    device_id = %key.device_id,
                    role_id = %key.role_id
                )
                .in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::PrimaryChange(key, old, new) => {
                debug_span!(
                    "group",
                    device_id = %key.device_id,
                    role_id = %key.role_id
                )
                .in_scope(|| {
                    debug!(?old, ?new, "{}", self);
                });
            }
            Debug::NotificationTx(session_id, notification) => {
                debug_span!("session", id = %session_id).in_scope(|| {
                    debug!(
                        election_id = ?notification.election_id,
                        status = %notification.status,
                        "{}",
                        self
                    );
                });
            }
            Debug::PipelineAction(device_id, action) => {
                debug_span!("pipeline", %device_id).in_scope(|| {
                    debug!(?action, "{}", self);
                });
            }
            Debug::PipelineCommit(device_id, cookie, generation) => {
                debug_span!("pipeline", %device_id).in_scope(|| {
                    debug!(%cookie, %generation, "{}", self);
                });
            }
            Debug::JournalReplay(device_id, replayed, dropped) => {
                debug_span!("pipeline", %device_id).in_scope(|| {
                    debug!(%replayed, %dropped, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SessionCreate(..) => {
                write!(f, "session created")
            }
            Debug::SessionDelete(..) => {
                write!(f, "session deleted")
            }
            Debug::SessionTerminate(..) => {
                write!(f, "session terminated")
            }
            Debug::ArbitrationRx(..) => {
                write!(f, "arbitration update")
            }
            Debug::ArbitrationIgnored(..) => {
                write!(f, "election ID already used by a backup, ignoring")
            }
            Debug::GroupCreate(..) => {
                write!(f, "arbitration group created")
            }
            Debug::GroupDelete(..) => {
                write!(f, "arbitration group deleted")
            }
            Debug::PrimaryChange(..) => {
                write!(f, "primary controller changed")
            }
            Debug::NotificationTx(..) => {
                write!(f, "arbitration notification")
            }
            Debug::PipelineAction(..) => {
                write!(f, "forwarding pipeline config request")
            }
            Debug::PipelineCommit(..) => {
                write!(f, "forwarding pipeline config committed")
            }
            Debug::JournalReplay(..) => {
                write!(f, "replayed writes since last save")
            }
        }
    }
}
