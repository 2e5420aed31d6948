//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use derive_new::new;
use tracing::warn;

use crate::device::Device;
use crate::election::ElectionId;
use crate::error::Error;
use crate::gate;
use crate::pipeline::P4Info;
use crate::{DeviceId, RoleId};

// Journal size above which a warning is logged.
pub const JOURNAL_WARN_LEN: usize = 65536;

// Table entry identity.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(new)]
pub struct EntryKey {
    pub table_id: u32,
    pub match_key: Bytes,
    pub priority: i32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(new)]
pub struct TableEntry {
    pub table_id: u32,
    pub match_key: Bytes,
    pub priority: i32,
    // Opaque action specification.
    pub action: Bytes,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateType {
    Unspecified,
    Insert,
    Modify,
    Delete,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(new)]
pub struct Update {
    pub update_type: UpdateType,
    pub entry: TableEntry,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Atomicity {
    #[default]
    ContinueOnError,
    RollbackOnError,
    DataplaneAtomic,
}

#[derive(Clone, Debug)]
#[derive(new)]
pub struct WriteRequest {
    pub device_id: DeviceId,
    pub role_id: RoleId,
    pub election_id: Option<ElectionId>,
    pub updates: Vec<Update>,
    #[new(default)]
    pub atomicity: Atomicity,
}

// Outcome of each update, in request order.
#[derive(Debug, Default)]
pub struct WriteResponse {
    pub results: Vec<Result<(), Error>>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(new)]
pub struct ReadFilter {
    // Zero selects all tables.
    pub table_id: u32,
}

// Entities of a device, as seen by the control plane.
#[derive(Debug, Default)]
pub struct TableStore {
    entries: BTreeMap<EntryKey, TableEntry>,
    // Number of entries per table.
    counts: HashMap<u32, u32>,
}

// Reverts a single applied update.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Undo {
    Remove(EntryKey),
    Restore(TableEntry),
}

// ===== impl TableEntry =====

impl TableEntry {
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.table_id, self.match_key.clone(), self.priority)
    }
}

// ===== impl WriteRequest =====

impl WriteRequest {
    pub fn with_atomicity(mut self, atomicity: Atomicity) -> WriteRequest {
        self.atomicity = atomicity;
        self
    }
}

// ===== impl WriteResponse =====

impl WriteResponse {
    pub fn is_ok(&self) -> bool {
        self.results.iter().all(|result| result.is_ok())
    }
}

// ===== impl TableStore =====

impl TableStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &EntryKey) -> Option<&TableEntry> {
        self.entries.get(key)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.counts.clear();
    }

    // Applies a single update against the given program.
    pub(crate) fn apply(
        &mut self,
        p4info: &P4Info,
        update: &Update,
    ) -> Result<Undo, Error> {
        let entry = &update.entry;
        let Some(table) = p4info.table(entry.table_id) else {
            return Err(Error::UnknownTable(entry.table_id));
        };
        if entry.match_key.is_empty() {
            return Err(Error::EmptyMatchKey(entry.table_id));
        }

        let key = entry.key();
        match update.update_type {
            UpdateType::Unspecified => Err(Error::UnspecifiedUpdate),
            UpdateType::Insert => {
                if self.entries.contains_key(&key) {
                    return Err(Error::EntryExists(key));
                }
                let count = self.counts.entry(table.id).or_default();
                if *count >= table.size {
                    return Err(Error::TableFull(table.id, table.size));
                }
                *count += 1;
                self.entries.insert(key.clone(), entry.clone());
                Ok(Undo::Remove(key))
            }
            UpdateType::Modify => match self.entries.get_mut(&key) {
                Some(old) => {
                    let old = std::mem::replace(old, entry.clone());
                    Ok(Undo::Restore(old))
                }
                None => Err(Error::EntryNotFound(key)),
            },
            UpdateType::Delete => match self.remove(&key) {
                Some(old) => Ok(Undo::Restore(old)),
                None => Err(Error::EntryNotFound(key)),
            },
        }
    }

    pub(crate) fn undo(&mut self, undo: Undo) {
        match undo {
            Undo::Remove(key) => {
                self.remove(&key);
            }
            Undo::Restore(entry) => {
                if self.entries.insert(entry.key(), entry.clone()).is_none() {
                    *self.counts.entry(entry.table_id).or_default() += 1;
                }
            }
        }
    }

    // Returns the entries of one table, or of all tables.
    pub(crate) fn read(
        &self,
        p4info: &P4Info,
        filter: ReadFilter,
    ) -> Result<Vec<TableEntry>, Error> {
        if filter.table_id == 0 {
            return Ok(self.entries.values().cloned().collect());
        }
        if p4info.table(filter.table_id).is_none() {
            return Err(Error::UnknownTable(filter.table_id));
        }
        Ok(self
            .entries
            .values()
            .filter(|entry| entry.table_id == filter.table_id)
            .cloned()
            .collect())
    }

    fn remove(&mut self, key: &EntryKey) -> Option<TableEntry> {
        let entry = self.entries.remove(key)?;
        if let Some(count) = self.counts.get_mut(&key.table_id) {
            *count = count.saturating_sub(1);
        }
        Some(entry)
    }
}

// ===== global functions =====

pub(crate) fn write(
    device: &Device,
    request: WriteRequest,
) -> Result<WriteResponse, Error> {
    let mut forwarding = device.forwarding();

    gate::authorize(device, request.role_id, request.election_id)?;
    let Some(committed) = device.committed() else {
        return Err(Error::PipelineNotConfigured(device.id));
    };

    let mut response = WriteResponse::default();
    let mut applied = vec![];
    let mut failed = false;
    let mut denied = None;
    for update in request.updates {
        // Mastership can change while the call is in progress. Updates
        // already applied stay applied.
        if denied.is_none()
            && let Err(error) = gate::authorize(
                device,
                request.role_id,
                request.election_id,
            )
        {
            error.log();
            denied = Some(error);
        }
        if let Some(error) = &denied {
            response.results.push(Err(error.clone()));
            continue;
        }

        match forwarding.tables.apply(&committed.p4info, &update) {
            Ok(undo) => {
                applied.push((response.results.len(), undo, update));
                response.results.push(Ok(()));
            }
            Err(error) => {
                error.log();
                failed = true;
                response.results.push(Err(error));
            }
        }
    }

    if failed && request.atomicity != Atomicity::ContinueOnError {
        for (index, undo, _) in applied.into_iter().rev() {
            forwarding.tables.undo(undo);
            response.results[index] = Err(Error::UpdateAborted);
        }
        return Ok(response);
    }

    if let Some(journal) = &mut forwarding.journal {
        let old_len = journal.len();
        journal.extend(applied.into_iter().map(|(_, _, update)| update));
        if journal_warn(old_len, journal.len()) {
            warn!(
                device_id = %device.id,
                len = %journal.len(),
                "write journal keeps growing without a commit"
            );
        }
    }

    Ok(response)
}

pub(crate) fn read(
    device: &Device,
    filter: ReadFilter,
) -> Result<Vec<TableEntry>, Error> {
    let forwarding = device.forwarding();
    let Some(committed) = device.committed() else {
        return Err(Error::PipelineNotConfigured(device.id));
    };
    forwarding.tables.read(&committed.p4info, filter)
}

// Whether the journal just reached the size worth warning about.
fn journal_warn(old_len: usize, new_len: usize) -> bool {
    old_len < JOURNAL_WARN_LEN && new_len >= JOURNAL_WARN_LEN
}

// ===== unit tests =====
