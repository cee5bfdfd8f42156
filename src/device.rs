/*
    himd-rs
    https://github.com/himd-rs/himd

    Copyright 2026 The himd-rs contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! The seam to a physically attached recorder.
//!
//! The authentication exchange rides on five vendor SCSI opcodes; a driver
//! implements [`SecureDevice`] over whatever transport it has. The library
//! never opens USB itself.

use crate::HimdError;

/// Vendor SCSI opcodes of the secure session.
pub mod opcodes {
    pub const WRITE_HOST_LEAF_ID: u8 = 0x30;
    pub const GET_AUTH_STAGE2_INFO: u8 = 0x31;
    pub const WRITE_AUTH_STAGE3_INFO: u8 = 0x32;
    pub const READ_ICV: u8 = 0x33;
    pub const WRITE_ICV: u8 = 0x34;
}

/// Payload of the stage-2 response (opcode 0x31).
#[derive(Clone, Debug)]
pub struct Stage2Info {
    pub disc_id: [u8; 16],
    pub mac: [u8; 8],
    pub device_leaf_id: [u8; 8],
    pub device_nonce: [u8; 8],
    pub key_type: u32,
    pub key_level: u32,
    pub ekb_id: u32,
    pub key: [u8; 16],
}

/// Payload of the ICV read (opcode 0x33).
#[derive(Clone, Debug)]
pub struct IcvInfo {
    pub header: [u8; 8],
    pub icv: [u8; 16],
    pub mac: [u8; 8],
}

/// Driver contract for a recorder attached over SCSI.
pub trait SecureDevice {
    fn write_host_leaf_id(
        &mut self,
        leaf_id: &[u8; 8],
        host_nonce: &[u8; 8],
    ) -> Result<(), HimdError>;

    fn get_authentication_stage2_info(&mut self) -> Result<Stage2Info, HimdError>;

    fn write_authentication_stage3_info(&mut self, host_mac: &[u8; 8]) -> Result<(), HimdError>;

    fn read_icv(&mut self) -> Result<IcvInfo, HimdError>;

    fn write_icv(
        &mut self,
        header: &[u8; 8],
        icv: &[u8; 16],
        mac: &[u8; 8],
    ) -> Result<(), HimdError>;

    fn reformat(&mut self) -> Result<(), HimdError> {
        Err(HimdError::UnsupportedOperation)
    }

    fn wipe(&mut self) -> Result<(), HimdError> {
        Err(HimdError::UnsupportedOperation)
    }
}

/// A known recorder, keyed by its USB identity.
#[derive(Copy, Clone, Debug)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
}

/// Recorders known to speak the secure session in Hi-MD mode.
pub const KNOWN_DEVICES: [DeviceId; 5] = [
    DeviceId {
        vendor_id: 0x054C,
        product_id: 0x017F,
        name: "Sony MZ-NH1",
    },
    DeviceId {
        vendor_id: 0x054C,
        product_id: 0x0181,
        name: "Sony MZ-NH600/NH700/NH800",
    },
    DeviceId {
        vendor_id: 0x054C,
        product_id: 0x0183,
        name: "Sony MZ-NH900",
    },
    DeviceId {
        vendor_id: 0x054C,
        product_id: 0x0210,
        name: "Sony MZ-RH10",
    },
    DeviceId {
        vendor_id: 0x054C,
        product_id: 0x0287,
        name: "Sony MZ-RH1",
    },
];

/// Look up a recorder by USB identity.
pub fn identify(vendor_id: u16, product_id: u16) -> Option<&'static DeviceId> {
    KNOWN_DEVICES
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_known_and_unknown() {
        assert_eq!(identify(0x054C, 0x0287).unwrap().name, "Sony MZ-RH1");
        assert!(identify(0x054C, 0xFFFF).is_none());
        assert!(identify(0x0000, 0x0287).is_none());
    }
}
