//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic::{self, AtomicU64, AtomicUsize};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};

use crate::arbiter::{self, GroupKey};
use crate::debug::Debug;
use crate::election::ElectionId;
use crate::engine::EngineInner;
use crate::error::Error;
use crate::notification::NotificationSender;

pub type SessionId = u64;

/// Server-side state of one open stream channel.
///
/// The session only refers to its arbitration group through a
/// [`GroupKey`]. Dropping it (stream closed, transport failure, task
/// cancellation) removes it from the group and re-runs the election.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: ConnState,
    create_time: DateTime<Utc>,
    // Group this session arbitrated for, once established.
    pub(crate) binding: Option<GroupKey>,
    // Last accepted role config and election ID.
    pub(crate) role_config: Option<Bytes>,
    pub(crate) election_id: Option<ElectionId>,
    // Arbitration notifications towards the client.
    pub(crate) tx: NotificationSender,
    engine: Arc<EngineInner>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnState {
    Open,
    Terminated,
}

// Session registry counters.
#[derive(Debug, Default)]
pub(crate) struct Sessions {
    // Number of open streams.
    open: AtomicUsize,
    // Last allocated ID.
    last_id: AtomicU64,
}

// ===== impl Session =====

impl Session {
    pub(crate) fn new(
        id: SessionId,
        tx: NotificationSender,
        engine: Arc<EngineInner>,
    ) -> Session {
        Debug::SessionCreate(id).log();

        Session {
            id,
            state: ConnState::Open,
            create_time: Utc::now(),
            binding: None,
            role_config: None,
            election_id: None,
            tx,
            engine,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ConnState::Terminated
    }

    // Time elapsed since the stream was opened.
    pub fn uptime(&self) -> TimeDelta {
        Utc::now() - self.create_time
    }

    pub fn binding(&self) -> Option<&GroupKey> {
        self.binding.as_ref()
    }

    pub fn election_id(&self) -> Option<ElectionId> {
        self.election_id
    }

    pub fn role_config(&self) -> Option<&Bytes> {
        self.role_config.as_ref()
    }

    // Closes the session. Safe to call more than once.
    pub(crate) fn terminate(&mut self) {
        if self.state == ConnState::Terminated {
            return;
        }
        self.state = ConnState::Terminated;
        Debug::SessionTerminate(self.id).log();

        // Leave the arbitration group, if any.
        if let Some(key) = self.binding.take()
            && let Ok(device) = self.engine.device(key.device_id)
        {
            arbiter::leave(device, key.role_id, self.id);
        }

        self.engine.sessions.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.terminate();
        Debug::SessionDelete(self.id, self.uptime()).log();
    }
}

// ===== impl Sessions =====

impl Sessions {
    // Registers a new stream, failing when the stream limit is reached.
    pub(crate) fn open(&self, max_streams: usize) -> Result<SessionId, Error> {
        self.open
            .fetch_update(
                atomic::Ordering::AcqRel,
                atomic::Ordering::Acquire,
                |open| (open < max_streams).then_some(open + 1),
            )
            .map_err(|_| Error::StreamLimitReached(max_streams))?;

        Ok(self.last_id.fetch_add(1, atomic::Ordering::Relaxed) + 1)
    }

    pub(crate) fn close(&self) {
        self.open.fetch_sub(1, atomic::Ordering::AcqRel);
    }

    pub(crate) fn count(&self) -> usize {
        self.open.load(atomic::Ordering::Acquire)
    }
}
