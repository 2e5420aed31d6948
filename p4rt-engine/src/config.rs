//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use serde::Deserialize;

use crate::DeviceId;

// Device inventory and resource limits handed to the engine at construction.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Maximum number of simultaneously open stream channels.
    pub max_streams: usize,
    // Managed devices.
    pub devices: Vec<DeviceCfg>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceCfg {
    pub id: DeviceId,
    // Maximum number of arbitrated sessions, across all roles.
    #[serde(default = "DeviceCfg::dflt_max_sessions")]
    pub max_sessions: usize,
}

// ===== impl Config =====

impl Config {
    pub const DFLT_MAX_STREAMS: usize = 256;

    pub fn with_devices<I>(devices: I) -> Config
    where
        I: IntoIterator<Item = DeviceId>,
    {
        Config {
            devices: devices.into_iter().map(DeviceCfg::new).collect(),
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_streams: Config::DFLT_MAX_STREAMS,
            devices: vec![DeviceCfg::new(1)],
        }
    }
}

// ===== impl DeviceCfg =====

impl DeviceCfg {
    pub const DFLT_MAX_SESSIONS: usize = 16;

    pub fn new(id: DeviceId) -> DeviceCfg {
        DeviceCfg {
            id,
            max_sessions: DeviceCfg::DFLT_MAX_SESSIONS,
        }
    }

    fn dflt_max_sessions() -> usize {
        DeviceCfg::DFLT_MAX_SESSIONS
    }
}
