use crate::config::{HardwareParams, MeasurementConfig};
use crate::constants::{REG16_READ_LEN, REG24_READ_LEN};
use crate::hal::RegisterBus;
use crate::register::{AdcConfigReg, ConfigReg, DiagAlertReg, Register, RegisterValue};
use crate::sample::RawSample;
use tracing::debug;

/// Register-level driver for the INA229.
///
/// Every method is a short, non-blocking bus transaction so it can run both in
/// the alert handler and, under the critical section, from the main loop.
/// Waits between transactions are up to the caller.
pub struct PowerMonitor<B> {
    bus: B,
}

impl<B: RegisterBus> PowerMonitor<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn read_u16(&mut self, reg: Register) -> u16 {
        let mut buf = [0u8; REG16_READ_LEN];
        self.bus.read(reg.addr(), &mut buf);
        u16::from_be_bytes([buf[1], buf[2]])
    }

    pub fn read_u24(&mut self, reg: Register) -> RawSample {
        let mut buf = [0u8; REG24_READ_LEN];
        self.bus.read(reg.addr(), &mut buf);
        RawSample::from_read(&buf)
    }

    pub fn write(&mut self, reg: Register, value: u16) {
        debug!(reg = ?reg, value = format_args!("{value:#06x}"), "register write");
        self.bus.write(reg.addr(), value);
    }

    /// MANUFACTURER_ID and DEVICE_ID
    pub fn identify(&mut self) -> (u16, u16) {
        let manufacturer = self.read_u16(Register::ManufacturerId);
        let device = self.read_u16(Register::DeviceId);
        (manufacturer, device)
    }

    /// Issue a full register reset. The device needs `RESET_DELAY_MS` afterwards.
    pub fn start_reset(&mut self) {
        self.write(Register::Config, ConfigReg::new().with_reset(true).to_word());
    }

    /// Write range, calibration, conversion setup and alert routing.
    pub fn write_config(&mut self, config: &MeasurementConfig, hw: &HardwareParams) {
        self.write(Register::Config, config.config_reg().to_word());
        self.write(Register::ShuntCal, hw.shunt_cal(config.adc_range));
        self.write(Register::AdcConfig, config.adc_config_reg().to_word());
        self.write(Register::DiagAlrt, config.diag_alert_reg().to_word());
    }

    pub fn read_adc_config(&mut self) -> AdcConfigReg {
        AdcConfigReg::from_word(self.read_u16(Register::AdcConfig))
    }

    /// Read DIAG_ALRT, which also clears the conversion ready flag.
    pub fn read_status(&mut self) -> DiagAlertReg {
        DiagAlertReg::from_word(self.read_u16(Register::DiagAlrt))
    }

    /// Bus voltage then current, raw
    pub fn read_sample_pair(&mut self) -> (RawSample, RawSample) {
        let vbus = self.read_u24(Register::VBus);
        let current = self.read_u24(Register::Current);
        (vbus, current)
    }
}
