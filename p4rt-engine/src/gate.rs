//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::RoleId;
use crate::device::Device;
use crate::election::ElectionId;
use crate::error::Error;

// Checks that a mutating request comes from the primary of its role.
//
// Requests don't carry a stream identifier, so the caller is identified by
// the election ID it presents, which must match the primary's exactly.
pub(crate) fn authorize(
    device: &Device,
    role_id: RoleId,
    election_id: Option<ElectionId>,
) -> Result<(), Error> {
    let Some((_, primary_election_id)) = device.primary(role_id) else {
        return Err(Error::NoPrimary(device.id, role_id));
    };

    if election_id != Some(primary_election_id) {
        return Err(Error::NotPrimary(device.id, role_id, election_id));
    }

    Ok(())
}
