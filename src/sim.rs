//! Simulated rig: a software INA229 register file wired to a simulated battery
//! source and load, plus the board collaborators and the alert source.

use pwrmon_lib::constants::{
    CURRENT_LSB_NARROW, CURRENT_LSB_WIDE, DAC_FULL_SCALE, DAC_VCC, DEVICE_ID_INA229, MANUFACTURER_ID_TI,
    VBUS_LSB_WIDE,
};
use pwrmon_lib::hal::{AlertLine, BatterySim, Delay, RegisterBus, VoltageSense};
use pwrmon_lib::pipeline::AlertContext;
use pwrmon_lib::register::{AdcConfigReg, ConfigReg, DiagAlertReg, Register, RegisterValue};
use pwrmon_lib::sample::RawSample;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

const ADC_CONFIG_POR: u16 = 0xFB68;
const SHUNT_CAL_POR: u16 = 0x1000;

/// Conversion times in µs indexed by the 3-bit CT code
const CONVERSION_TIME_US: [u32; 8] = [50, 84, 150, 280, 540, 1052, 2074, 4120];
/// Averaging counts indexed by the 3-bit AVG code
const AVERAGING_COUNT: [u32; 8] = [1, 4, 16, 64, 128, 256, 512, 1024];

/// Upper bound of alerts delivered per scheduler tick
const MAX_ALERTS_PER_TICK: u32 = 64;

#[derive(Debug)]
pub struct SimState {
    config: ConfigReg,
    adc_config: AdcConfigReg,
    shunt_cal: u16,
    diag: DiagAlertReg,
    conversions: u64,

    dac_code: u16,
    output_enabled: bool,
    voltage_sense: bool,
    load_ohms: f32,
    alert_enabled: bool,
}

impl SimState {
    fn new(load_ohms: f32) -> Self {
        Self {
            config: ConfigReg::new(),
            adc_config: AdcConfigReg::from_word(ADC_CONFIG_POR),
            shunt_cal: SHUNT_CAL_POR,
            diag: DiagAlertReg::new(),
            conversions: 0,
            dac_code: 0,
            output_enabled: false,
            voltage_sense: false,
            load_ohms,
            alert_enabled: false,
        }
    }

    fn power_on_reset(&mut self) {
        self.config = ConfigReg::new();
        self.adc_config = AdcConfigReg::from_word(ADC_CONFIG_POR);
        self.shunt_cal = SHUNT_CAL_POR;
        self.diag = DiagAlertReg::new();
    }

    /// Source voltage at the output terminals
    pub fn output_voltage(&self) -> f32 {
        if self.output_enabled {
            self.dac_code as f32 / DAC_FULL_SCALE as f32 * DAC_VCC
        } else {
            0.0
        }
    }

    pub fn load_current(&self) -> f32 {
        if self.load_ohms > 0.0 {
            self.output_voltage() / self.load_ohms
        } else {
            0.0
        }
    }

    /// Time between two completed conversions, zero when the ADC is shut down
    pub fn conversion_period(&self) -> Duration {
        let mode = self.adc_config.mode();
        if mode & 0x7 == 0 {
            return Duration::ZERO;
        }
        let ct = |code: u8| CONVERSION_TIME_US[code as usize & 0x7];
        let mut per_conversion = 0;
        if mode & 0x1 != 0 {
            per_conversion += ct(self.adc_config.bus_ct());
        }
        if mode & 0x2 != 0 {
            per_conversion += ct(self.adc_config.shunt_ct());
        }
        if mode & 0x4 != 0 {
            per_conversion += ct(self.adc_config.temp_ct());
        }
        let avg = AVERAGING_COUNT[self.adc_config.avg() as usize & 0x7];
        Duration::from_micros(per_conversion as u64 * avg as u64)
    }

    fn complete_conversion(&mut self) {
        self.conversions += 1;
        self.diag.set_conversion_ready(true);
    }

    fn vbus_payload(&self) -> u32 {
        if !self.voltage_sense {
            return RawSample::from_counts(0).payload();
        }
        let counts = (self.output_voltage() / VBUS_LSB_WIDE).round() as i32;
        RawSample::from_counts(counts).payload()
    }

    fn current_payload(&self) -> u32 {
        let lsb = if self.config.adc_range() {
            CURRENT_LSB_NARROW
        } else {
            CURRENT_LSB_WIDE
        };
        let mut counts = (self.load_current() / lsb).round() as i32;
        if counts != 0 {
            // a little conversion noise
            counts += (self.conversions % 5) as i32 - 2;
        }
        RawSample::from_counts(counts).payload()
    }

    fn read_register(&mut self, reg: Register) -> u32 {
        match reg {
            Register::Config => self.config.to_word() as u32,
            Register::AdcConfig => self.adc_config.to_word() as u32,
            Register::ShuntCal => self.shunt_cal as u32,
            Register::VBus => self.vbus_payload(),
            Register::Current => self.current_payload(),
            Register::DiagAlrt => {
                let word = self.diag.to_word();
                self.diag.set_conversion_ready(false);
                word as u32
            }
            Register::ManufacturerId => MANUFACTURER_ID_TI as u32,
            Register::DeviceId => DEVICE_ID_INA229 as u32,
            _ => 0,
        }
    }

    fn write_register(&mut self, reg: Register, value: u16) {
        match reg {
            Register::Config => {
                let config = ConfigReg::from_word(value);
                if config.reset() {
                    debug!("simulated monitor reset");
                    self.power_on_reset();
                } else {
                    self.config = config;
                }
            }
            Register::AdcConfig => self.adc_config = AdcConfigReg::from_word(value),
            Register::ShuntCal => self.shunt_cal = value & 0x7FFF,
            Register::DiagAlrt => {
                // flag bits are read only
                let flags = self.diag.to_word() & 0x00FF;
                self.diag = DiagAlertReg::from_word((value & 0xFF00) | flags);
            }
            _ => trace!(?reg, value, "write to unmodelled register"),
        }
    }
}

/// Shared handle to the simulated hardware
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    pub fn new(load_ohms: f32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(load_ohms))),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn bus(&self) -> SimBus {
        SimBus { sim: self.clone() }
    }

    pub fn board(&self) -> SimBoard {
        SimBoard { sim: self.clone() }
    }

    pub fn conversions(&self) -> u64 {
        self.state().conversions
    }
}

/// SPI side of the simulated monitor
#[derive(Debug, Clone)]
pub struct SimBus {
    sim: SimHandle,
}

impl RegisterBus for SimBus {
    fn read(&mut self, addr: u8, buf: &mut [u8]) {
        let value = self.sim.state().read_register(Register::from(addr));
        buf[0] = 0;
        let width = (buf.len() - 1).min(4);
        let bytes = value.to_be_bytes();
        buf[1..=width].copy_from_slice(&bytes[4 - width..]);
    }

    fn write(&mut self, addr: u8, value: u16) {
        self.sim.state().write_register(Register::from(addr), value);
    }
}

/// GPIO, DAC and IO expander of the simulated board
#[derive(Debug, Clone)]
pub struct SimBoard {
    sim: SimHandle,
}

impl AlertLine for SimBoard {
    fn enable_alert(&mut self) {
        self.sim.state().alert_enabled = true;
    }

    fn disable_alert(&mut self) {
        self.sim.state().alert_enabled = false;
    }
}

impl Delay for SimBoard {
    async fn delay_ms(&mut self, ms: u32) {
        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
    }
}

impl BatterySim for SimBoard {
    fn write_code(&mut self, code: u16) {
        self.sim.state().dac_code = code & 0x0FFF;
    }

    fn set_output(&mut self, enabled: bool) {
        self.sim.state().output_enabled = enabled;
        info!(led = if enabled { "on" } else { "off" }, "status indicator");
    }
}

impl VoltageSense for SimBoard {
    fn set_voltage_sense(&mut self, enabled: bool) {
        self.sim.state().voltage_sense = enabled;
        debug!(enabled, "bus voltage sense");
    }
}

/// Drive conversions in real time and deliver the alert interrupt while the
/// line is enabled.
pub fn spawn_alert_source(sim: SimHandle, alert: Arc<AlertContext<SimBus>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();
        let mut owed = Duration::ZERO;

        loop {
            tick.tick().await;
            let now = Instant::now();
            owed += now - last;
            last = now;

            let period = sim.state().conversion_period();
            if period.is_zero() {
                owed = Duration::ZERO;
                continue;
            }

            let mut delivered = 0;
            while owed >= period && delivered < MAX_ALERTS_PER_TICK {
                owed -= period;
                delivered += 1;

                let enabled = {
                    let mut state = sim.state();
                    state.complete_conversion();
                    state.alert_enabled
                };
                if enabled {
                    alert.on_alert();
                }
            }
            if delivered == MAX_ALERTS_PER_TICK {
                owed = Duration::ZERO;
            }
        }
    })
}

/// DAC code for a source voltage
pub fn dac_code_for(volts: f32) -> u16 {
    let code = (volts / DAC_VCC * DAC_FULL_SCALE as f32).round();
    code.clamp(0.0, (DAC_FULL_SCALE - 1) as f32) as u16
}
