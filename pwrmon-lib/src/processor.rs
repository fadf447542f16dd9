//! Command protocol: `Idle -> Validate -> Execute -> Respond -> Idle` per frame.

use crate::command::{Command, Response};
use crate::config::{HardwareParams, MeasurementConfig, MeasurementConfigRaw, ScaleFactors};
use crate::constants::{CONFIG_SETTLE_MS, DAC_DEFAULT_CODE, DAC_MAX_CODE, RESET_DELAY_MS};
use crate::error::PMError;
use crate::hal::{Board, RegisterBus};
use crate::pipeline::{AlertContext, RunState};
use crate::register::RegisterValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the stored configuration and executes host commands against the
/// hardware and the acquisition pipeline.
pub struct CommandProcessor<B, H> {
    alert: Arc<AlertContext<B>>,
    board: H,
    hw: HardwareParams,
    config: MeasurementConfig,
    scales: ScaleFactors,
    sim_code: u16,
    sim_output: bool,
}

impl<B, H> CommandProcessor<B, H>
where
    B: RegisterBus + Send,
    H: Board + Send,
{
    pub fn new(alert: Arc<AlertContext<B>>, board: H, hw: HardwareParams) -> Self {
        let config = MeasurementConfig::default();
        Self {
            alert,
            board,
            hw,
            config,
            scales: ScaleFactors::for_range(config.adc_range),
            sim_code: DAC_DEFAULT_CODE,
            sim_output: false,
        }
    }

    pub fn config(&self) -> MeasurementConfig {
        self.config
    }

    pub fn scales(&self) -> ScaleFactors {
        self.scales
    }

    pub fn sim_code(&self) -> u16 {
        self.sim_code
    }

    pub fn sim_output(&self) -> bool {
        self.sim_output
    }

    pub fn board(&self) -> &H {
        &self.board
    }

    pub fn run_state(&self) -> RunState {
        self.alert.with_sampler(|s| s.state())
    }

    /// Handle one received frame. `None` means nothing goes back to the host:
    /// the frame was malformed, or it was START/STOP.
    pub async fn process(&mut self, frame: &[u8]) -> Option<Response> {
        // Validate: framing
        let command = match Command::try_from(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!(len = frame.len(), error = %e, "dropping malformed command frame");
                return None;
            }
        };
        let code = command.code();
        debug!(?command, "command received");

        // Validate: parameters, then Execute
        let ok = match self.execute(command).await {
            Ok(()) => true,
            Err(e) => {
                warn!(?code, error = %e, "command failed");
                false
            }
        };

        // Respond
        if !code.has_response() {
            return None;
        }
        let response = if code.is_config_command() {
            Response::with_config(code, ok, MeasurementConfigRaw::from(self.config), self.hw)
        } else {
            Response::status(code, ok)
        };
        Some(response)
    }

    async fn execute(&mut self, command: Command) -> Result<(), PMError> {
        match command {
            Command::Nop => {}
            Command::Reset => self.reset().await,
            Command::WriteConfig(raw) => {
                let config = MeasurementConfig::try_from(raw)?;
                let paused = self.store_config(config);
                self.apply_config().await;
                if paused {
                    let scales = self.scales;
                    self.alert.with_sampler(|s| s.resume(scales));
                    debug!("sampling resumed with new scales");
                }
            }
            Command::ReadConfig => {}
            Command::ApplyConfig => self.apply_config().await,
            Command::SetSimVoltage(code) => self.set_sim_code(code),
            Command::SetSimOutput(enabled) => self.set_sim_output(enabled),
            Command::StartMeasure => self.start_measure(),
            Command::StopMeasure => self.stop_measure(),
            Command::Unknown(code) => return Err(PMError::UnknownCommand(code)),
        }
        Ok(())
    }

    /// Full register reset of the monitor. The pipeline keeps its run state.
    pub async fn reset(&mut self) {
        info!("resetting power monitor");
        self.alert.with_monitor(|m| m.start_reset());
        self.board.delay_ms(RESET_DELAY_MS).await;
    }

    /// Store a validated configuration. A running pipeline is paused until the
    /// monitor has settled in the new setup; returns whether it was paused.
    fn store_config(&mut self, config: MeasurementConfig) -> bool {
        let scales = ScaleFactors::for_range(config.adc_range);
        if scales != self.scales {
            debug!(range = %config.adc_range, "scale factors changed");
        }
        self.config = config;
        self.scales = scales;

        let paused = self.alert.with_sampler(|s| s.pause());
        info!(%config, paused, "configuration stored");
        paused
    }

    /// Write the stored configuration to the monitor and read it back.
    pub async fn apply_config(&mut self) {
        let config = self.config;
        let hw = self.hw;
        self.alert.with_monitor(|m| m.write_config(&config, &hw));

        self.board.delay_ms(CONFIG_SETTLE_MS).await;

        let expected = config.adc_config_reg();
        let readback = self.alert.with_monitor(|m| m.read_adc_config());
        if readback != expected {
            warn!(
                expected = format_args!("{:#06x}", expected.to_word()),
                actual = format_args!("{:#06x}", readback.to_word()),
                "ADC_CONFIG readback mismatch"
            );
        }
    }

    pub fn set_sim_code(&mut self, code: u16) {
        let clamped = code.min(DAC_MAX_CODE);
        if clamped != code {
            warn!(requested = code, clamped, "simulator code above safe limit");
        }
        self.sim_code = clamped;
        self.board.write_code(clamped);
        debug!(code = clamped, "simulator code written");
    }

    pub fn set_sim_output(&mut self, enabled: bool) {
        self.sim_output = enabled;
        self.board.set_output(enabled);
        info!(enabled, "simulator output");
    }

    /// Connect the bus input, arm the pipeline with the current scales, then
    /// unmask the alert.
    pub fn start_measure(&mut self) {
        let scales = self.scales;
        self.board.disable_alert();
        self.board.set_voltage_sense(true);
        self.alert.with_sampler(|s| s.arm(scales));
        self.board.enable_alert();
        info!("measurement started");
    }

    pub fn stop_measure(&mut self) {
        self.board.disable_alert();
        self.alert.with_sampler(|s| s.disarm());
        self.board.set_voltage_sense(false);
        info!("measurement stopped");
    }
}
