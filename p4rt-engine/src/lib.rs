//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Mastership arbitration and write authorization for P4Runtime servers.
//!
//! The [`Engine`] tracks one [`Session`] per open stream channel, elects a
//! primary controller per (device-id, role-id) group, fans out arbitration
//! advisories and gates every mutating RPC on the elected primary.

pub mod arbiter;
pub mod config;
pub mod dataplane;
pub mod debug;
pub mod device;
pub mod election;
pub mod engine;
pub mod error;
pub mod gate;
pub mod notification;
pub mod pipeline;
pub mod session;
pub mod table;

pub use crate::engine::Engine;
pub use crate::error::{Code, Error};
pub use crate::session::Session;

pub type DeviceId = u64;
pub type RoleId = u64;

// Role used by controllers that don't advertise one.
pub const DEFAULT_ROLE_ID: RoleId = 0;

// P4Runtime API version implemented by the engine.
pub const P4RUNTIME_VERSION: &str = "1.4.1";
