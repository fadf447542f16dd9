use crate::constants::*;
use crate::error::PMError;
use crate::register::{AdcConfigReg, ConfigReg, DiagAlertReg, MODE_CONTINUOUS_SHUNT_BUS};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use strum_macros::Display;
use zerocopy::byteorder::little_endian::F32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Bus and shunt conversion time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ConversionTime {
    #[default]
    #[strum(to_string = "280 µs")]
    Us280 = 0x3,
    #[strum(to_string = "540 µs")]
    Us540 = 0x4,
    #[strum(to_string = "1052 µs")]
    Us1052 = 0x5,
    #[strum(to_string = "2074 µs")]
    Us2074 = 0x6,
    #[strum(to_string = "4120 µs")]
    Us4120 = 0x7,
}

impl ConversionTime {
    pub fn as_us(&self) -> u32 {
        match self {
            ConversionTime::Us280 => 280,
            ConversionTime::Us540 => 540,
            ConversionTime::Us1052 => 1052,
            ConversionTime::Us2074 => 2074,
            ConversionTime::Us4120 => 4120,
        }
    }
}

/// Number of conversions averaged per result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Averaging {
    #[default]
    #[strum(to_string = "1")]
    Avg1 = 0x0,
    #[strum(to_string = "4")]
    Avg4 = 0x1,
    #[strum(to_string = "16")]
    Avg16 = 0x2,
    #[strum(to_string = "64")]
    Avg64 = 0x3,
    #[strum(to_string = "128")]
    Avg128 = 0x4,
    #[strum(to_string = "256")]
    Avg256 = 0x5,
    #[strum(to_string = "512")]
    Avg512 = 0x6,
    #[strum(to_string = "1024")]
    Avg1024 = 0x7,
}

impl Averaging {
    pub fn count(&self) -> u32 {
        match self {
            Averaging::Avg1 => 1,
            Averaging::Avg4 => 4,
            Averaging::Avg16 => 16,
            Averaging::Avg64 => 64,
            Averaging::Avg128 => 128,
            Averaging::Avg256 => 256,
            Averaging::Avg512 => 512,
            Averaging::Avg1024 => 1024,
        }
    }
}

/// Shunt voltage full scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum AdcRange {
    #[default]
    #[strum(to_string = "±163.84 mV")]
    Wide = 0x0,
    #[strum(to_string = "±40.96 mV")]
    Narrow = 0x1,
}

/// Active acquisition parameters. Only constructed from valid codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeasurementConfig {
    pub conversion_time: ConversionTime,
    pub averaging: Averaging,
    pub adc_range: AdcRange,
    pub alert_on_average: bool,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            conversion_time: ConversionTime::Us280,
            averaging: Averaging::Avg1,
            adc_range: AdcRange::Wide,
            alert_on_average: true,
        }
    }
}

/// Configuration as carried on the wire, one code per byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MeasurementConfigRaw {
    pub conversion_time: u8,
    pub averaging: u8,
    pub adc_range: u8,
    pub alert_on_average: u8,
}

impl TryFrom<MeasurementConfigRaw> for MeasurementConfig {
    type Error = PMError;

    fn try_from(raw: MeasurementConfigRaw) -> Result<Self, Self::Error> {
        let conversion_time = ConversionTime::try_from(raw.conversion_time).map_err(|_| PMError::InvalidConfig {
            field: "conversion_time",
            value: raw.conversion_time,
        })?;
        let averaging = Averaging::try_from(raw.averaging).map_err(|_| PMError::InvalidConfig {
            field: "averaging",
            value: raw.averaging,
        })?;
        let adc_range = AdcRange::try_from(raw.adc_range).map_err(|_| PMError::InvalidConfig {
            field: "adc_range",
            value: raw.adc_range,
        })?;
        let alert_on_average = match raw.alert_on_average {
            0 => false,
            1 => true,
            value => {
                return Err(PMError::InvalidConfig {
                    field: "alert_on_average",
                    value,
                });
            }
        };

        Ok(Self {
            conversion_time,
            averaging,
            adc_range,
            alert_on_average,
        })
    }
}

impl From<MeasurementConfig> for MeasurementConfigRaw {
    fn from(config: MeasurementConfig) -> Self {
        Self {
            conversion_time: config.conversion_time.into(),
            averaging: config.averaging.into(),
            adc_range: config.adc_range.into(),
            alert_on_average: config.alert_on_average as u8,
        }
    }
}

impl MeasurementConfig {
    /// Time between two conversion ready alerts
    pub fn alert_period_us(&self) -> u32 {
        // bus and shunt are converted back to back
        2 * self.conversion_time.as_us() * self.averaging.count()
    }

    pub fn config_reg(&self) -> ConfigReg {
        ConfigReg::new().with_adc_range(self.adc_range == AdcRange::Narrow)
    }

    pub fn adc_config_reg(&self) -> AdcConfigReg {
        let ct: u8 = self.conversion_time.into();
        AdcConfigReg::new()
            .with_mode(MODE_CONTINUOUS_SHUNT_BUS)
            .with_bus_ct(ct)
            .with_shunt_ct(ct)
            .with_temp_ct(ct)
            .with_avg(self.averaging.into())
    }

    pub fn diag_alert_reg(&self) -> DiagAlertReg {
        DiagAlertReg::new()
            .with_conversion_ready_alert(true)
            .with_slow_alert(self.alert_on_average)
    }
}

impl fmt::Display for MeasurementConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CT: {}, AVG: {}, Range: {}, Alert on avg: {}",
            self.conversion_time, self.averaging, self.adc_range, self.alert_on_average
        )
    }
}

/// Physical units per count for the configured range
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScaleFactors {
    pub current_lsb: f32,
    pub shunt_voltage_lsb: f32,
    pub bus_voltage_lsb: f32,
}

impl ScaleFactors {
    pub const WIDE: ScaleFactors = ScaleFactors {
        current_lsb: CURRENT_LSB_WIDE,
        shunt_voltage_lsb: VSHUNT_LSB_WIDE,
        bus_voltage_lsb: VBUS_LSB_WIDE,
    };

    pub const NARROW: ScaleFactors = ScaleFactors {
        current_lsb: CURRENT_LSB_NARROW,
        shunt_voltage_lsb: VSHUNT_LSB_NARROW,
        bus_voltage_lsb: VBUS_LSB_NARROW,
    };

    pub fn for_range(range: AdcRange) -> Self {
        match range {
            AdcRange::Wide => Self::WIDE,
            AdcRange::Narrow => Self::NARROW,
        }
    }
}

impl Default for ScaleFactors {
    fn default() -> Self {
        Self::WIDE
    }
}

/// Fixed board constants reported with every config response
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HardwareParams {
    pub supply_v: f32,
    pub r_shunt: f32,
}

impl Default for HardwareParams {
    fn default() -> Self {
        Self {
            supply_v: ADC_VCC,
            r_shunt: R_SHUNT,
        }
    }
}

impl HardwareParams {
    /// SHUNT_CAL register value for the given range
    pub fn shunt_cal(&self, range: AdcRange) -> u16 {
        let scales = ScaleFactors::for_range(range);
        let cal = SHUNT_CAL_SCALE * scales.current_lsb as f64 * self.r_shunt as f64;
        let cal = match range {
            AdcRange::Wide => cal,
            AdcRange::Narrow => cal * 4.0,
        };
        // SHUNT_CAL is a 15 bit field
        cal.round().clamp(0.0, 0x7FFF as f64) as u16
    }
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct HardwareParamsRaw {
    pub supply_v: F32,
    pub r_shunt: F32,
}

impl From<HardwareParams> for HardwareParamsRaw {
    fn from(hw: HardwareParams) -> Self {
        Self {
            supply_v: F32::new(hw.supply_v),
            r_shunt: F32::new(hw.r_shunt),
        }
    }
}

impl From<HardwareParamsRaw> for HardwareParams {
    fn from(raw: HardwareParamsRaw) -> Self {
        Self {
            supply_v: raw.supply_v.get(),
            r_shunt: raw.r_shunt.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterValue;

    #[test]
    fn default_config_codes() {
        let raw = MeasurementConfigRaw::from(MeasurementConfig::default());
        assert_eq!(raw.as_bytes(), &[0x3, 0x0, 0x0, 0x1]);
    }

    #[test]
    fn shunt_cal_is_4096_in_both_ranges() {
        let hw = HardwareParams::default();
        assert_eq!(hw.shunt_cal(AdcRange::Wide), 4096);
        assert_eq!(hw.shunt_cal(AdcRange::Narrow), 4096);
    }

    #[test]
    fn adc_config_encoding() {
        let config = MeasurementConfig {
            conversion_time: ConversionTime::Us540,
            averaging: Averaging::Avg64,
            adc_range: AdcRange::Wide,
            alert_on_average: false,
        };
        let word = config.adc_config_reg().to_word();
        assert_eq!(word, (0xB << 12) | (0x4 << 9) | (0x4 << 6) | (0x4 << 3) | 0x3);
        assert_eq!(config.diag_alert_reg().to_word(), 1 << 14);
    }

    #[test]
    fn rejects_each_field() {
        let good = MeasurementConfigRaw::from(MeasurementConfig::default());

        let bad = MeasurementConfigRaw { conversion_time: 0x2, ..good };
        assert!(matches!(
            MeasurementConfig::try_from(bad),
            Err(PMError::InvalidConfig { field: "conversion_time", value: 0x2 })
        ));
        let bad = MeasurementConfigRaw { averaging: 0x8, ..good };
        assert!(MeasurementConfig::try_from(bad).is_err());
        let bad = MeasurementConfigRaw { adc_range: 0x2, ..good };
        assert!(MeasurementConfig::try_from(bad).is_err());
        let bad = MeasurementConfigRaw { alert_on_average: 0x2, ..good };
        assert!(MeasurementConfig::try_from(bad).is_err());
    }

    #[test]
    fn alert_period() {
        let config = MeasurementConfig {
            averaging: Averaging::Avg4,
            ..MeasurementConfig::default()
        };
        assert_eq!(config.alert_period_us(), 2 * 280 * 4);
    }
}
