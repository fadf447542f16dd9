mod common;

use common::*;
use pwrmon_lib::command::{Command, CommandCode, Response};
use pwrmon_lib::config::{AdcRange, HardwareParams, MeasurementConfig};
use pwrmon_lib::constants::*;
use pwrmon_lib::monitor::PowerMonitor;
use pwrmon_lib::pipeline::{AlertContext, RunState, report_pipeline};
use pwrmon_lib::processor::CommandProcessor;
use pwrmon_lib::report::ReportBatch;
use std::sync::Arc;

fn setup() -> (MockBus, MockBoard, CommandProcessor<MockBus, MockBoard>) {
    let bus = MockBus::new();
    let board = MockBoard::new();
    let (sampler, _queue) = report_pipeline();
    let ctx = Arc::new(AlertContext::new(PowerMonitor::new(bus.clone()), sampler));
    let processor = CommandProcessor::new(ctx, board.clone(), HardwareParams::default());
    (bus, board, processor)
}

fn raw(ct: u8, avg: u8, range: u8, alert: u8) -> MeasurementConfigRaw {
    MeasurementConfigRaw {
        conversion_time: ct,
        averaging: avg,
        adc_range: range,
        alert_on_average: alert,
    }
}

#[tokio::test]
async fn test_write_config_applies_registers() {
    let (bus, board, mut processor) = setup();

    let frame = hex_to_bytes("0203000005030101");
    let response = processor.process(&frame).await.unwrap();
    assert_eq!(response.code, 0x02);
    assert!(response.ok);
    let (echo, hw) = response.config.unwrap();
    assert_eq!(echo, raw(0x5, 0x3, 0x1, 0x1));
    assert_eq!(hw, HardwareParams::default());

    assert_eq!(processor.config().adc_range, AdcRange::Narrow);
    assert_eq!(processor.scales(), ScaleFactors::NARROW);

    let adc_config = (0xB << 12) | (0x5 << 9) | (0x5 << 6) | (0x5 << 3) | 0x3;
    assert_eq!(
        bus.writes(),
        vec![
            (Register::Config.addr(), 1 << 4),
            (Register::ShuntCal.addr(), 4096),
            (Register::AdcConfig.addr(), adc_config),
            (Register::DiagAlrt.addr(), (1 << 14) | (1 << 13)),
        ]
    );
    // settle delay, then ADC_CONFIG read back
    assert_eq!(board.state().delays, vec![CONFIG_SETTLE_MS]);
    assert_eq!(bus.reads().last(), Some(&Register::AdcConfig.addr()));
}

#[tokio::test]
async fn test_invalid_conversion_time_changes_nothing() {
    let (bus, _board, mut processor) = setup();
    let before = processor.config();

    let frame = Command::WriteConfig(raw(0x2, 0x0, 0x1, 0x1)).to_bytes();
    let response = processor.process(&frame).await.unwrap();
    assert!(!response.ok);
    assert_eq!(response.config.unwrap().0, MeasurementConfigRaw::from(before));

    assert_eq!(processor.config(), before);
    assert_eq!(processor.scales(), ScaleFactors::WIDE);
    assert!(bus.writes().is_empty());
}

#[tokio::test]
async fn test_each_invalid_field_is_rejected() {
    let (_bus, _board, mut processor) = setup();
    for bad in [raw(0x8, 0, 0, 1), raw(3, 0x9, 0, 1), raw(3, 0, 0x2, 1), raw(3, 0, 0, 0x7)] {
        let response = processor.process(&Command::WriteConfig(bad).to_bytes()).await.unwrap();
        assert!(!response.ok, "{bad:?} accepted");
    }
    assert_eq!(processor.config(), MeasurementConfig::default());
}

#[tokio::test]
async fn test_read_config_reports_default() {
    let (bus, _board, mut processor) = setup();
    let response = processor.process(&[0x03, 0x00, 0x00, 0x00]).await.unwrap();
    assert!(response.ok);
    assert_eq!(response.config.unwrap().0, raw(0x3, 0x0, 0x0, 0x1));
    assert_eq!(response.to_bytes().len(), CONFIG_RESPONSE_SIZE);
    assert_eq!(processor.scales(), ScaleFactors::WIDE);
    assert!(bus.writes().is_empty());
}

#[tokio::test]
async fn test_read_config_leaves_narrow_scales_alone() {
    let (bus, board, mut processor) = setup();
    let narrow = raw(0x4, 0x1, 0x1, 0x0);
    processor.process(&Command::WriteConfig(narrow).to_bytes()).await.unwrap();
    assert_eq!(processor.scales(), ScaleFactors::NARROW);
    bus.clear_log();
    board.state().delays.clear();

    let response = processor.process(&Command::ReadConfig.to_bytes()).await.unwrap();
    assert!(response.ok);
    assert_eq!(response.config.unwrap().0, narrow);
    assert_eq!(processor.scales(), ScaleFactors::NARROW);
    assert_eq!(processor.config().adc_range, AdcRange::Narrow);
    assert!(bus.writes().is_empty());
    assert!(bus.reads().is_empty());
    assert!(board.state().delays.is_empty());
}

#[tokio::test]
async fn test_apply_config_rewrites_stored_config() {
    let (bus, _board, mut processor) = setup();
    let response = processor.process(&[0x04, 0x00, 0x00, 0x00]).await.unwrap();
    assert!(response.ok);
    assert!(response.config.is_none());
    assert_eq!(bus.writes().len(), 4);
    assert_eq!(bus.register(Register::AdcConfig) as u16, MeasurementConfig::default().adc_config_reg().to_word());
}

#[tokio::test]
async fn test_reset_sets_rst_and_waits() {
    let (bus, board, mut processor) = setup();
    let response = processor.process(&Command::Reset.to_bytes()).await.unwrap();
    assert!(response.ok);
    assert_eq!(bus.writes(), vec![(Register::Config.addr(), 0x8000)]);
    assert_eq!(board.state().delays, vec![RESET_DELAY_MS]);
    assert_eq!(bus.register(Register::AdcConfig), ADC_CONFIG_POR as u32);
}

#[tokio::test]
async fn test_malformed_frames_get_no_response() {
    let (_bus, _board, mut processor) = setup();
    assert!(processor.process(&[]).await.is_none());
    assert!(processor.process(&[0x00, 0x00]).await.is_none());
    assert!(processor.process(&[0x02, 0x00, 0x00, 0x00]).await.is_none());
    assert!(processor.process(&[0x01, 0x00, 0x00, 0x00, 0x00]).await.is_none());
}

#[tokio::test]
async fn test_unknown_code_fails() {
    let (_bus, _board, mut processor) = setup();
    let response = processor.process(&[0x42, 0x00, 0x00, 0x00]).await.unwrap();
    assert_eq!(response, Response::status(CommandCode::Unknown(0x42), false));
}

#[tokio::test]
async fn test_nop_succeeds() {
    let (bus, _board, mut processor) = setup();
    let response = processor.process(&[0x00, 0x00, 0x00, 0x00]).await.unwrap();
    assert_eq!(response.to_bytes().as_ref(), &[0x00, 0x01, 0x00, 0x00]);
    assert!(bus.writes().is_empty());
}

#[tokio::test]
async fn test_sim_voltage_is_clamped() {
    let (_bus, board, mut processor) = setup();

    let response = processor.process(&Command::SetSimVoltage(3000).to_bytes()).await.unwrap();
    assert!(response.ok);
    assert_eq!(board.state().dac_code, Some(3000));

    processor.process(&[0x05, 0x0F, 0xFF, 0x00]).await.unwrap();
    assert_eq!(board.state().dac_code, Some(DAC_MAX_CODE));
    assert_eq!(processor.sim_code(), DAC_MAX_CODE);
}

#[tokio::test]
async fn test_sim_output_switch() {
    let (_bus, board, mut processor) = setup();
    processor.process(&[0x06, 0x01, 0x00, 0x00]).await.unwrap();
    assert!(board.state().output_enabled);
    processor.process(&[0x06, 0x00, 0x00, 0x00]).await.unwrap();
    assert!(!board.state().output_enabled);
    assert!(!processor.sim_output());
}

#[tokio::test]
async fn test_start_and_stop_are_silent() {
    let (_bus, board, mut processor) = setup();

    assert!(processor.process(&[0x07, 0x00, 0x00, 0x00]).await.is_none());
    assert_eq!(processor.run_state(), RunState::Armed);
    assert!(board.state().alert_enabled);
    assert!(board.state().voltage_sense);
    // alert masked while arming
    assert_eq!(board.state().alert_toggles, vec![false, true]);

    assert!(processor.process(&[0x08, 0x00, 0x00, 0x00]).await.is_none());
    assert_eq!(processor.run_state(), RunState::Stopped);
    assert!(!board.state().alert_enabled);
    assert!(!board.state().voltage_sense);
}

#[tokio::test]
async fn test_write_config_while_armed_switches_scales() {
    let bus = MockBus::new();
    let board = MockBoard::new();
    let (sampler, _queue) = report_pipeline();
    let ctx = Arc::new(AlertContext::new(PowerMonitor::new(bus.clone()), sampler));
    let mut processor = CommandProcessor::new(ctx.clone(), board, HardwareParams::default());

    processor.process(&Command::StartMeasure.to_bytes()).await;
    for _ in 0..20 {
        ctx.on_alert();
    }
    assert_eq!(ctx.with_sampler(|s| s.sample_index()), 20);

    let response = processor
        .process(&Command::WriteConfig(raw(0x3, 0x0, 0x1, 0x1)).to_bytes())
        .await
        .unwrap();
    assert!(response.ok);
    assert_eq!(ctx.with_sampler(|s| s.sample_index()), 0);
    assert_eq!(ctx.with_sampler(|s| s.scales()), ScaleFactors::NARROW);
    assert_eq!(ctx.with_sampler(|s| s.state()), RunState::Armed);
}

#[tokio::test]
async fn test_alerts_during_reconfiguration_are_not_sampled() {
    init_tracing();
    let bus = MockBus::new();
    // 0.4 A in the wide range, 0.1 A in the narrow one
    bus.set_sample_counts(19_456, 64_000);
    let board = MockBoard::new();
    let (sampler, mut queue) = report_pipeline();
    let ctx = Arc::new(AlertContext::new(PowerMonitor::new(bus.clone()), sampler));
    let mut processor = CommandProcessor::new(ctx.clone(), board.clone(), HardwareParams::default());

    processor.process(&Command::StartMeasure.to_bytes()).await;
    for _ in 0..20 {
        ctx.on_alert();
    }

    // conversions keep completing while the monitor settles in the new range
    let during_settle = ctx.clone();
    let settle_bus = bus.clone();
    board.on_delay(move |_| {
        assert_eq!(settle_bus.register(Register::Config) & (1 << 4), 1 << 4);
        for _ in 0..5 {
            during_settle.on_alert();
        }
        assert_eq!(during_settle.with_sampler(|s| s.state()), RunState::Paused);
    });
    let response = processor
        .process(&Command::WriteConfig(raw(0x3, 0x0, 0x1, 0x1)).to_bytes())
        .await
        .unwrap();
    assert!(response.ok);

    assert_eq!(ctx.with_sampler(|s| s.state()), RunState::Armed);
    assert_eq!(ctx.with_sampler(|s| s.sample_index()), 0);
    assert_eq!(queue.stats().ignored_alerts, 5);

    for _ in 0..REPORT_SAMPLES {
        ctx.on_alert();
    }
    let batch = ReportBatch::try_from(&*queue.next_ready().unwrap()).unwrap();
    assert_eq!(batch.sequence_id, 0);
    assert!(batch.current_a.iter().all(|i| (i - 0.1).abs() < 1e-9));
}
