//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::DeviceId;

pub type DataplaneSender = UnboundedSender<DataplaneMsg>;
pub type DataplaneReceiver = UnboundedReceiver<DataplaneMsg>;

// Side effects the engine signals to the forwarding plane.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum DataplaneMsg {
    // A new forwarding pipeline config was committed.
    PipelineCommitted {
        device_id: DeviceId,
        cookie: u64,
        generation: u64,
    },
    // All forwarding state of the device must be cleared.
    ForwardingReset { device_id: DeviceId },
}

pub fn channel() -> (DataplaneSender, DataplaneReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
