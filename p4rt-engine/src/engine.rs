//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::arbiter::{self, Arbitration, ArbitrationUpdate, SessionRole};
use crate::config::Config;
use crate::dataplane::DataplaneSender;
use crate::device::Device;
use crate::election::ElectionId;
use crate::error::Error;
use crate::notification::NotificationReceiver;
use crate::pipeline::{self, PipelineConfig, ResponseType, SetPipelineRequest};
use crate::session::{Session, Sessions};
use crate::table::{self, ReadFilter, TableEntry, WriteRequest, WriteResponse};
use crate::{DeviceId, RoleId, gate};

/// Handle to the arbitration engine.
///
/// Cloning is cheap; all clones share the same devices and sessions.
#[derive(Clone, Debug)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
pub(crate) struct EngineInner {
    pub max_streams: usize,
    // Managed devices. Fixed at construction.
    pub devices: BTreeMap<DeviceId, Device>,
    pub sessions: Sessions,
    pub dataplane_tx: DataplaneSender,
}

// ===== impl Engine =====

impl Engine {
    /// Creates an engine managing the devices listed in the configuration.
    ///
    /// Commits and forwarding state resets are reported on `dataplane_tx`.
    pub fn new(config: &Config, dataplane_tx: DataplaneSender) -> Engine {
        let mut devices = BTreeMap::new();
        for device in &config.devices {
            // The first entry of a duplicated device ID wins.
            if devices.contains_key(&device.id) {
                warn!(device_id = %device.id, "duplicate device ID, ignoring");
                continue;
            }
            devices.insert(device.id, Device::new(device));
        }
        info!(
            devices = ?devices.keys().collect::<Vec<_>>(),
            max_streams = %config.max_streams,
            "engine started"
        );

        Engine {
            inner: Arc::new(EngineInner {
                max_streams: config.max_streams,
                devices,
                sessions: Default::default(),
                dataplane_tx,
            }),
        }
    }

    /// Registers a new stream channel.
    ///
    /// Returns the session and the receiving end of its arbitration
    /// notifications. Fails with `ResourceExhausted` when the maximum number
    /// of open streams is reached.
    pub fn open_session(
        &self,
    ) -> Result<(Session, NotificationReceiver), Error> {
        let id = self.inner.sessions.open(self.inner.max_streams)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(id, tx, self.inner.clone());
        Ok((session, rx))
    }

    /// Processes an arbitration update received on the given session.
    ///
    /// When the returned error is fatal the session has been terminated and
    /// the stream must be closed.
    pub fn arbitrate(
        &self,
        session: &mut Session,
        update: ArbitrationUpdate,
    ) -> Result<Arbitration, Error> {
        arbiter::arbitrate(&self.inner, session, update)
    }

    pub fn session_role(&self, session: &Session) -> SessionRole {
        arbiter::session_role(&self.inner, session)
    }

    /// Checks whether the given election ID belongs to the primary of the
    /// (device, role) pair.
    pub fn authorize(
        &self,
        device_id: DeviceId,
        role_id: RoleId,
        election_id: Option<ElectionId>,
    ) -> Result<(), Error> {
        let device = self.inner.device(device_id)?;
        gate::authorize(device, role_id, election_id)
    }

    pub fn write(&self, request: WriteRequest) -> Result<WriteResponse, Error> {
        let device = self.inner.device(request.device_id)?;
        table::write(device, request)
    }

    pub fn read(
        &self,
        device_id: DeviceId,
        filter: ReadFilter,
    ) -> Result<Vec<TableEntry>, Error> {
        let device = self.inner.device(device_id)?;
        table::read(device, filter)
    }

    pub fn set_pipeline_config(
        &self,
        request: SetPipelineRequest,
    ) -> Result<(), Error> {
        let device = self.inner.device(request.device_id)?;
        pipeline::set_config(device, &self.inner.dataplane_tx, request)
    }

    /// Returns the committed forwarding pipeline config, if any.
    pub fn get_pipeline_config(
        &self,
        device_id: DeviceId,
        response_type: ResponseType,
    ) -> Result<Option<PipelineConfig>, Error> {
        let device = self.inner.device(device_id)?;
        Ok(pipeline::get_config(device, response_type))
    }

    pub fn device(&self, device_id: DeviceId) -> Option<&Device> {
        self.inner.devices.get(&device_id)
    }

    pub fn open_streams(&self) -> usize {
        self.inner.sessions.count()
    }
}

// ===== impl EngineInner =====

impl EngineInner {
    pub(crate) fn device(&self, device_id: DeviceId) -> Result<&Device, Error> {
        self.devices
            .get(&device_id)
            .ok_or(Error::DeviceNotFound(device_id))
    }
}
