//! Command and response frames of the host command channel.
//!
//! ```text
//! command:  [code][param_1][param_2][param_3]            (4 bytes)
//!           WRITE_CONFIG appends [ct][avg][range][alert]  (8 bytes)
//! response: [code][result][0][0]                          (4 bytes)
//!           config commands append [ct][avg][range][alert][vcc f32][rshunt f32]
//! ```

use crate::config::{HardwareParams, HardwareParamsRaw, MeasurementConfigRaw};
use crate::constants::*;
use crate::error::PMError;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    Nop = 0x00,
    Reset = 0x01,
    WriteConfig = 0x02,
    ReadConfig = 0x03,
    ApplyConfig = 0x04,
    SetSimVoltage = 0x05,
    SetSimOutput = 0x06,
    StartMeasure = 0x07,
    StopMeasure = 0x08,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl CommandCode {
    /// Exact frame length the command must arrive with
    pub fn frame_len(&self) -> usize {
        match self {
            CommandCode::WriteConfig => WRITE_CONFIG_FRAME_SIZE,
            _ => COMMAND_HEADER_SIZE,
        }
    }

    /// START/STOP change the run state silently
    pub fn has_response(&self) -> bool {
        !matches!(self, CommandCode::StartMeasure | CommandCode::StopMeasure)
    }

    /// Responses to these carry the configuration block
    pub fn is_config_command(&self) -> bool {
        matches!(self, CommandCode::WriteConfig | CommandCode::ReadConfig)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CommandHeader {
    pub code: u8,
    pub param_1: u8,
    pub param_2: u8,
    pub param_3: u8,
}

/// A length-checked command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Nop,
    Reset,
    /// Config codes are not range-checked here, that is part of execution
    WriteConfig(MeasurementConfigRaw),
    ReadConfig,
    ApplyConfig,
    SetSimVoltage(u16),
    SetSimOutput(bool),
    StartMeasure,
    StopMeasure,
    Unknown(u8),
}

impl Command {
    pub fn code(&self) -> CommandCode {
        match self {
            Command::Nop => CommandCode::Nop,
            Command::Reset => CommandCode::Reset,
            Command::WriteConfig(_) => CommandCode::WriteConfig,
            Command::ReadConfig => CommandCode::ReadConfig,
            Command::ApplyConfig => CommandCode::ApplyConfig,
            Command::SetSimVoltage(_) => CommandCode::SetSimVoltage,
            Command::SetSimOutput(_) => CommandCode::SetSimOutput,
            Command::StartMeasure => CommandCode::StartMeasure,
            Command::StopMeasure => CommandCode::StopMeasure,
            Command::Unknown(code) => CommandCode::Unknown(*code),
        }
    }

    /// Encode as the host sends it
    pub fn to_bytes(&self) -> Bytes {
        let mut header = CommandHeader {
            code: self.code().into(),
            param_1: 0,
            param_2: 0,
            param_3: 0,
        };
        match self {
            Command::SetSimVoltage(code) => {
                [header.param_1, header.param_2] = code.to_be_bytes();
            }
            Command::SetSimOutput(enabled) => header.param_1 = *enabled as u8,
            _ => {}
        }

        let mut buf = BytesMut::with_capacity(WRITE_CONFIG_FRAME_SIZE);
        buf.put_slice(header.as_bytes());
        if let Command::WriteConfig(config) = self {
            buf.put_slice(config.as_bytes());
        }
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = PMError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let (header, payload) =
            CommandHeader::ref_from_prefix(bytes).map_err(|_| PMError::InsufficientData {
                expected: COMMAND_HEADER_SIZE,
                actual: bytes.len(),
            })?;

        let code = CommandCode::from_primitive(header.code);
        if bytes.len() != code.frame_len() {
            return Err(PMError::InvalidFrame(format!(
                "{:?} expects {} bytes, got {}",
                code,
                code.frame_len(),
                bytes.len()
            )));
        }

        Ok(match code {
            CommandCode::Nop => Command::Nop,
            CommandCode::Reset => Command::Reset,
            CommandCode::WriteConfig => {
                let config = MeasurementConfigRaw::read_from_bytes(payload)
                    .map_err(|_| PMError::InvalidLength)?;
                Command::WriteConfig(config)
            }
            CommandCode::ReadConfig => Command::ReadConfig,
            CommandCode::ApplyConfig => Command::ApplyConfig,
            CommandCode::SetSimVoltage => {
                Command::SetSimVoltage(u16::from_be_bytes([header.param_1, header.param_2]))
            }
            CommandCode::SetSimOutput => Command::SetSimOutput(header.param_1 != 0),
            CommandCode::StartMeasure => Command::StartMeasure,
            CommandCode::StopMeasure => Command::StopMeasure,
            CommandCode::Unknown(code) => Command::Unknown(code),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ResponseHeader {
    pub code: u8,
    pub result: u8,
    pub reserved: [u8; 2],
}

/// Response frame contents
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Response {
    pub code: u8,
    pub ok: bool,
    /// Present for READ_CONFIG / WRITE_CONFIG
    pub config: Option<(MeasurementConfigRaw, HardwareParams)>,
}

impl Response {
    pub fn status(code: CommandCode, ok: bool) -> Self {
        Self {
            code: code.into(),
            ok,
            config: None,
        }
    }

    pub fn with_config(code: CommandCode, ok: bool, config: MeasurementConfigRaw, hw: HardwareParams) -> Self {
        Self {
            code: code.into(),
            ok,
            config: Some((config, hw)),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let header = ResponseHeader {
            code: self.code,
            result: self.ok as u8,
            reserved: [0; 2],
        };
        let mut buf = BytesMut::with_capacity(CONFIG_RESPONSE_SIZE);
        buf.put_slice(header.as_bytes());
        if let Some((config, hw)) = &self.config {
            buf.put_slice(config.as_bytes());
            buf.put_slice(HardwareParamsRaw::from(*hw).as_bytes());
        }
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = PMError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let (header, rest) = ResponseHeader::ref_from_prefix(bytes).map_err(|_| PMError::InsufficientData {
            expected: RESPONSE_HEADER_SIZE,
            actual: bytes.len(),
        })?;
        let code = CommandCode::from_primitive(header.code);

        let config = if code.is_config_command() {
            if bytes.len() < CONFIG_RESPONSE_SIZE {
                return Err(PMError::InsufficientData {
                    expected: CONFIG_RESPONSE_SIZE,
                    actual: bytes.len(),
                });
            }
            let (config, rest) =
                MeasurementConfigRaw::read_from_prefix(rest).map_err(|_| PMError::InvalidLength)?;
            let (hw, _) = HardwareParamsRaw::read_from_prefix(rest).map_err(|_| PMError::InvalidLength)?;
            Some((config, HardwareParams::from(hw)))
        } else {
            None
        };

        Ok(Self {
            code: header.code,
            ok: header.result != 0,
            config,
        })
    }
}
