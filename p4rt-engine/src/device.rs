//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::sync::atomic::{self, AtomicUsize};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwapOption;

use crate::arbiter::{Group, GroupKey};
use crate::config::DeviceCfg;
use crate::election::ElectionId;
use crate::error::Error;
use crate::pipeline::ForwardingPipeline;
use crate::session::SessionId;
use crate::table::{TableStore, Update};
use crate::{DeviceId, RoleId};

// A managed device and all the state keyed by its device ID.
#[derive(Debug)]
pub struct Device {
    pub id: DeviceId,
    pub max_sessions: usize,
    // Number of arbitrated sessions, across all roles.
    sessions: AtomicUsize,
    // Arbitration groups keyed by role ID. Each group has its own lock; the
    // map lock is only held to look up, create or unlink groups.
    groups: Mutex<HashMap<RoleId, Arc<Mutex<Group>>>>,
    // Committed forwarding pipeline config.
    pub(crate) committed: ArcSwapOption<ForwardingPipeline>,
    // Pending config, write journal and entities.
    forwarding: Mutex<ForwardingState>,
}

#[derive(Debug, Default)]
pub(crate) struct ForwardingState {
    // Config saved by VERIFY_AND_SAVE, waiting for a COMMIT.
    pub pending: Option<ForwardingPipeline>,
    // Updates accepted since the last VERIFY_AND_SAVE.
    pub journal: Option<Vec<Update>>,
    pub tables: TableStore,
}

// ===== impl Device =====

impl Device {
    pub(crate) fn new(config: &DeviceCfg) -> Device {
        Device {
            id: config.id,
            max_sessions: config.max_sessions,
            sessions: AtomicUsize::new(0),
            groups: Default::default(),
            committed: ArcSwapOption::empty(),
            forwarding: Default::default(),
        }
    }

    // Number of arbitrated sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.load(atomic::Ordering::Acquire)
    }

    // Reserves a session slot, failing when the device limit is reached.
    pub(crate) fn reserve_session(&self) -> Result<(), Error> {
        self.sessions
            .fetch_update(
                atomic::Ordering::AcqRel,
                atomic::Ordering::Acquire,
                |count| (count < self.max_sessions).then_some(count + 1),
            )
            .map(|_| ())
            .map_err(|_| Error::SessionLimitReached(self.id, self.max_sessions))
    }

    pub(crate) fn release_session(&self) {
        self.sessions.fetch_sub(1, atomic::Ordering::AcqRel);
    }

    // Runs the closure with the group of the given role locked, creating the
    // group if necessary.
    pub(crate) fn with_group<F, R>(&self, role_id: RoleId, f: F) -> R
    where
        F: FnOnce(&mut Group) -> R,
    {
        let mut f = Some(f);
        loop {
            let group = self
                .groups
                .lock()
                .unwrap()
                .entry(role_id)
                .or_insert_with(|| {
                    let key = GroupKey::new(self.id, role_id);
                    Arc::new(Mutex::new(Group::new(key)))
                })
                .clone();

            // The group might have been unlinked after the lookup.
            let guard = group.lock().unwrap();
            if guard.removed {
                continue;
            }
            if let Some(f) = f.take() {
                return self.run_locked(role_id, &group, guard, f);
            }
        }
    }

    // Runs the closure with the group of the given role locked, if it
    // exists.
    pub(crate) fn with_existing_group<F, R>(
        &self,
        role_id: RoleId,
        f: F,
    ) -> Option<R>
    where
        F: FnOnce(&mut Group) -> R,
    {
        let group = self.groups.lock().unwrap().get(&role_id).cloned()?;
        let guard = group.lock().unwrap();
        if guard.removed {
            return None;
        }
        Some(self.run_locked(role_id, &group, guard, f))
    }

    // Returns the primary of the given role, if any.
    pub fn primary(&self, role_id: RoleId) -> Option<(SessionId, ElectionId)> {
        self.with_existing_group(role_id, |group| group.primary())
            .flatten()
    }

    pub(crate) fn forwarding(&self) -> MutexGuard<'_, ForwardingState> {
        self.forwarding.lock().unwrap()
    }

    pub fn committed(&self) -> Option<Arc<ForwardingPipeline>> {
        self.committed.load_full()
    }

    fn run_locked<F, R>(
        &self,
        role_id: RoleId,
        group: &Arc<Mutex<Group>>,
        mut guard: MutexGuard<'_, Group>,
        f: F,
    ) -> R
    where
        F: FnOnce(&mut Group) -> R,
    {
        let result = f(&mut guard);

        // Unlink the group once its last member is gone. The group lock is
        // still held, so concurrent joiners will observe the removed flag
        // and retry with a fresh group.
        if guard.is_empty() {
            guard.removed = true;
            let mut groups = self.groups.lock().unwrap();
            if groups
                .get(&role_id)
                .is_some_and(|entry| Arc::ptr_eq(entry, group))
            {
                groups.remove(&role_id);
            }
        }

        result
    }
}
