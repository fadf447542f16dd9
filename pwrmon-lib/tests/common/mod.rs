//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use hex;
#[allow(unused_imports)]
pub use pwrmon_lib::config::{MeasurementConfigRaw, ScaleFactors};
#[allow(unused_imports)]
pub use pwrmon_lib::error::PMError;
#[allow(unused_imports)]
pub use pwrmon_lib::register::{Register, RegisterValue};
#[allow(unused_imports)]
pub use pwrmon_lib::sample::RawSample;

use pwrmon_lib::constants::{DEVICE_ID_INA229, MANUFACTURER_ID_TI};
use pwrmon_lib::hal::{AlertLine, BatterySim, Delay, RegisterBus, VoltageSense};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Power-on value of ADC_CONFIG
#[allow(dead_code)]
pub const ADC_CONFIG_POR: u16 = 0xFB68;

/// Conversion ready flag in DIAG_ALRT
#[allow(dead_code)]
pub const CNVRF: u16 = 1 << 1;

/// Route library logs to the test output; `RUST_LOG` selects the level.
#[allow(dead_code)]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

#[derive(Debug, Default)]
pub struct BusState {
    pub registers: HashMap<u8, u32>,
    pub reads: Vec<u8>,
    pub writes: Vec<(u8, u16)>,
}

impl BusState {
    fn power_on(&mut self) {
        self.registers.clear();
        self.registers.insert(Register::AdcConfig.addr(), ADC_CONFIG_POR as u32);
        self.registers.insert(Register::ShuntCal.addr(), 0x1000);
        self.registers.insert(Register::ManufacturerId.addr(), MANUFACTURER_ID_TI as u32);
        self.registers.insert(Register::DeviceId.addr(), DEVICE_ID_INA229 as u32);
    }
}

/// Register file standing in for the INA229. Clones share state so a test can
/// inspect traffic after the bus moved into the driver.
#[derive(Debug, Clone)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

#[allow(dead_code)]
impl MockBus {
    pub fn new() -> Self {
        let mut state = BusState::default();
        state.power_on();
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().expect("bus state poisoned")
    }

    pub fn set_register(&self, reg: Register, value: u32) {
        self.state().registers.insert(reg.addr(), value);
    }

    pub fn register(&self, reg: Register) -> u32 {
        self.state().registers.get(&reg.addr()).copied().unwrap_or(0)
    }

    /// Present these raw counts in VBUS and CURRENT
    pub fn set_sample_counts(&self, vbus: i32, current: i32) {
        self.set_register(Register::VBus, RawSample::from_counts(vbus).payload());
        self.set_register(Register::Current, RawSample::from_counts(current).payload());
    }

    pub fn writes(&self) -> Vec<(u8, u16)> {
        self.state().writes.clone()
    }

    pub fn reads(&self) -> Vec<u8> {
        self.state().reads.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state();
        state.reads.clear();
        state.writes.clear();
    }
}

impl RegisterBus for MockBus {
    fn read(&mut self, addr: u8, buf: &mut [u8]) {
        let mut state = self.state();
        state.reads.push(addr);
        let value = state.registers.get(&addr).copied().unwrap_or(0);
        if addr == Register::DiagAlrt.addr() {
            state.registers.insert(addr, value & !(CNVRF as u32));
        }

        // turnaround byte, then MSB first
        buf[0] = 0;
        let width = buf.len() - 1;
        let bytes = value.to_be_bytes();
        buf[1..].copy_from_slice(&bytes[4 - width..]);
    }

    fn write(&mut self, addr: u8, value: u16) {
        let mut state = self.state();
        state.writes.push((addr, value));
        if addr == Register::Config.addr() && value & 0x8000 != 0 {
            state.power_on();
            return;
        }
        state.registers.insert(addr, value as u32);
    }
}

#[derive(Debug, Default)]
pub struct BoardState {
    pub alert_enabled: bool,
    pub alert_toggles: Vec<bool>,
    pub delays: Vec<u32>,
    pub dac_code: Option<u16>,
    pub output_enabled: bool,
    pub voltage_sense: bool,
}

type DelayHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Board collaborators. A delay hook stands in for whatever the hardware does
/// while the main loop waits.
#[derive(Clone, Default)]
pub struct MockBoard {
    state: Arc<Mutex<BoardState>>,
    on_delay: Arc<Mutex<Option<DelayHook>>>,
}

#[allow(dead_code)]
impl MockBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().expect("board state poisoned")
    }

    /// Run `hook` with the requested duration on every delay
    pub fn on_delay(&self, hook: impl Fn(u32) + Send + Sync + 'static) {
        *self.on_delay.lock().expect("delay hook poisoned") = Some(Arc::new(hook));
    }
}

impl AlertLine for MockBoard {
    fn enable_alert(&mut self) {
        let mut state = self.state();
        state.alert_enabled = true;
        state.alert_toggles.push(true);
    }

    fn disable_alert(&mut self) {
        let mut state = self.state();
        state.alert_enabled = false;
        state.alert_toggles.push(false);
    }
}

impl Delay for MockBoard {
    async fn delay_ms(&mut self, ms: u32) {
        self.state().delays.push(ms);
        let hook = self.on_delay.lock().expect("delay hook poisoned").clone();
        if let Some(hook) = hook {
            hook(ms);
        }
    }
}

impl BatterySim for MockBoard {
    fn write_code(&mut self, code: u16) {
        self.state().dac_code = Some(code);
    }

    fn set_output(&mut self, enabled: bool) {
        self.state().output_enabled = enabled;
    }
}

impl VoltageSense for MockBoard {
    fn set_voltage_sense(&mut self, enabled: bool) {
        self.state().voltage_sense = enabled;
    }
}
