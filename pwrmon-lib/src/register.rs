//! INA229 register map and bitfield layouts.
//!
//! Registers are addressed with a 6-bit address. Every read clocks out one
//! turnaround byte before the register contents, which are sent MSB first.

use modular_bitfield::prelude::*;
use num_enum::{FromPrimitive, IntoPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Register {
    Config = 0x00,
    AdcConfig = 0x01,
    ShuntCal = 0x02,
    ShuntTempco = 0x03,
    VShunt = 0x04,
    VBus = 0x05,
    DieTemp = 0x06,
    Current = 0x07,
    Power = 0x08,
    Energy = 0x09,
    Charge = 0x0A,
    DiagAlrt = 0x0B,
    Sovl = 0x0C,
    Suvl = 0x0D,
    Bovl = 0x0E,
    Buvl = 0x0F,
    TempLimit = 0x10,
    PwrLimit = 0x11,
    ManufacturerId = 0x3E,
    DeviceId = 0x3F,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl Register {
    pub fn addr(self) -> u8 {
        self.into()
    }
}

/// CONFIG (0x00)
#[bitfield(bytes = 2)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigReg {
    #[skip]
    unused: B4,
    /// Shunt full scale: 0 = ±163.84 mV, 1 = ±40.96 mV
    pub adc_range: bool,
    pub temp_comp: bool,
    /// Initial conversion delay in 2 ms steps
    pub conv_delay: u8,
    pub reset_acc: bool,
    pub reset: bool,
}

/// ADC_CONFIG (0x01)
#[bitfield(bytes = 2)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdcConfigReg {
    pub avg: B3,
    pub temp_ct: B3,
    pub shunt_ct: B3,
    pub bus_ct: B3,
    pub mode: B4,
}

/// DIAG_ALRT (0x0B)
#[bitfield(bytes = 2)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagAlertReg {
    pub mem_stat: bool,
    /// Conversion ready flag, cleared by reading DIAG_ALRT
    pub conversion_ready: bool,
    pub power_over: bool,
    pub bus_under: bool,
    pub bus_over: bool,
    pub shunt_under: bool,
    pub shunt_over: bool,
    pub temp_over: bool,
    #[skip]
    unused: B1,
    pub math_overflow: bool,
    pub charge_overflow: bool,
    pub energy_overflow: bool,
    pub alert_polarity: bool,
    /// Limit comparisons use the averaged value
    pub slow_alert: bool,
    /// Route the conversion ready flag to the ALERT pin
    pub conversion_ready_alert: bool,
    pub alert_latch: bool,
}

/// Continuous shunt and bus voltage conversions
pub const MODE_CONTINUOUS_SHUNT_BUS: u8 = 0xB;

/// Register values are sent MSB first; the bitfields are laid out LSB first.
pub trait RegisterValue {
    fn to_word(self) -> u16;
    fn from_word(word: u16) -> Self;
}

macro_rules! register_value {
    ($($reg:ty),*) => {
        $(
            impl RegisterValue for $reg {
                fn to_word(self) -> u16 {
                    u16::from_le_bytes(self.into_bytes())
                }

                fn from_word(word: u16) -> Self {
                    Self::from_bytes(word.to_le_bytes())
                }
            }
        )*
    };
}

register_value!(ConfigReg, AdcConfigReg, DiagAlertReg);
