//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use derive_new::new;

use crate::dataplane::{DataplaneMsg, DataplaneSender};
use crate::debug::Debug;
use crate::device::{Device, ForwardingState};
use crate::election::ElectionId;
use crate::error::{ConfigError, Error};
use crate::gate;
use crate::table::Update;
use crate::{DeviceId, RoleId};

// Program descriptor, reduced to what the entity store needs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(new)]
pub struct P4Info {
    pub tables: Vec<TableInfo>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(new)]
pub struct TableInfo {
    pub id: u32,
    pub name: String,
    // Maximum number of entries.
    pub size: u32,
}

// Forwarding pipeline config as exchanged with controllers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(new)]
pub struct PipelineConfig {
    pub p4info: Option<P4Info>,
    pub device_config: Bytes,
    pub cookie: u64,
}

// Validated forwarding pipeline config.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForwardingPipeline {
    pub p4info: P4Info,
    pub device_config: Bytes,
    pub cookie: u64,
    // Incremented by every commit.
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Unspecified,
    Verify,
    VerifyAndSave,
    VerifyAndCommit,
    Commit,
}

// Parts of the committed config returned by a get request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ResponseType {
    #[default]
    All,
    CookieOnly,
    P4InfoAndCookie,
    DeviceConfigAndCookie,
}

#[derive(Clone, Debug)]
#[derive(new)]
pub struct SetPipelineRequest {
    pub device_id: DeviceId,
    pub role_id: RoleId,
    pub election_id: Option<ElectionId>,
    pub action: Action,
    pub config: Option<PipelineConfig>,
}

// ===== impl P4Info =====

impl P4Info {
    pub fn table(&self, id: u32) -> Option<&TableInfo> {
        self.tables.iter().find(|table| table.id == id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tables.is_empty() {
            return Err(ConfigError::NoTables);
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for table in &self.tables {
            if table.id == 0 {
                return Err(ConfigError::InvalidTableId(table.name.clone()));
            }
            if !ids.insert(table.id) {
                return Err(ConfigError::DuplicateTableId(table.id));
            }
            if table.name.is_empty() {
                return Err(ConfigError::MissingTableName(table.id));
            }
            if !names.insert(table.name.as_str()) {
                return Err(ConfigError::DuplicateTableName(table.name.clone()));
            }
            if table.size == 0 {
                return Err(ConfigError::InvalidTableSize(table.id));
            }
        }

        Ok(())
    }
}

// ===== impl PipelineConfig =====

impl PipelineConfig {
    // Checks whether the config can be realized by the device.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.p4info {
            Some(p4info) => p4info.validate(),
            None => Err(ConfigError::MissingP4Info),
        }
    }
}

// ===== impl ForwardingPipeline =====

impl ForwardingPipeline {
    fn verify(config: Option<PipelineConfig>) -> Result<Self, Error> {
        let config = config.ok_or(Error::MissingConfig)?;
        config.validate()?;
        let PipelineConfig {
            p4info,
            device_config,
            cookie,
        } = config;

        Ok(ForwardingPipeline {
            p4info: p4info.unwrap_or_default(),
            device_config,
            cookie,
            generation: 0,
        })
    }

    fn to_config(&self, response_type: ResponseType) -> PipelineConfig {
        let p4info = match response_type {
            ResponseType::All | ResponseType::P4InfoAndCookie => {
                Some(self.p4info.clone())
            }
            _ => None,
        };
        let device_config = match response_type {
            ResponseType::All | ResponseType::DeviceConfigAndCookie => {
                self.device_config.clone()
            }
            _ => Bytes::new(),
        };

        PipelineConfig::new(p4info, device_config, self.cookie)
    }
}

// ===== global functions =====

pub(crate) fn set_config(
    device: &Device,
    dataplane_tx: &DataplaneSender,
    request: SetPipelineRequest,
) -> Result<(), Error> {
    Debug::PipelineAction(device.id, request.action).log();

    let mut forwarding = device.forwarding();
    gate::authorize(device, request.role_id, request.election_id)?;

    match request.action {
        Action::Unspecified => Err(Error::UnspecifiedAction),
        Action::Verify => {
            ForwardingPipeline::verify(request.config)?;
            Ok(())
        }
        Action::VerifyAndSave => {
            let pipeline = ForwardingPipeline::verify(request.config)?;
            forwarding.pending = Some(pipeline);
            forwarding.journal = Some(vec![]);
            Ok(())
        }
        Action::VerifyAndCommit => {
            let pipeline = ForwardingPipeline::verify(request.config)?;
            forwarding.pending = None;
            forwarding.journal = None;
            commit(device, &mut forwarding, dataplane_tx, pipeline, vec![]);
            Ok(())
        }
        Action::Commit => {
            let Some(pipeline) = forwarding.pending.take() else {
                return Err(Error::NoPendingConfig(device.id));
            };
            let journal = forwarding.journal.take().unwrap_or_default();
            commit(device, &mut forwarding, dataplane_tx, pipeline, journal);
            Ok(())
        }
    }
}

pub(crate) fn get_config(
    device: &Device,
    response_type: ResponseType,
) -> Option<PipelineConfig> {
    device
        .committed()
        .map(|pipeline| pipeline.to_config(response_type))
}

// Installs a new committed config, resetting all entities and replaying the
// given journal against the new program.
fn commit(
    device: &Device,
    forwarding: &mut ForwardingState,
    dataplane_tx: &DataplaneSender,
    mut pipeline: ForwardingPipeline,
    journal: Vec<Update>,
) {
    pipeline.generation = device
        .committed()
        .map_or(0, |committed| committed.generation)
        + 1;

    forwarding.tables.clear();
    let _ = dataplane_tx.send(DataplaneMsg::ForwardingReset {
        device_id: device.id,
    });

    if !journal.is_empty() {
        let mut dropped = 0;
        for update in &journal {
            if let Err(error) =
                forwarding.tables.apply(&pipeline.p4info, update)
            {
                error.log();
                dropped += 1;
            }
        }
        Debug::JournalReplay(device.id, journal.len() - dropped, dropped)
            .log();
    }

    Debug::PipelineCommit(device.id, pipeline.cookie, pipeline.generation)
        .log();
    let _ = dataplane_tx.send(DataplaneMsg::PipelineCommitted {
        device_id: device.id,
        cookie: pipeline.cookie,
        generation: pipeline.generation,
    });
    device.committed.store(Some(Arc::new(pipeline)));
}

// ===== unit tests =====
