use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use pwrmon_lib::config::MeasurementConfigRaw;
use pwrmon_lib::constants::{REPORT_SAMPLES, RESET_DELAY_MS};
use pwrmon_lib::transport::{HostLink, channel_link};
use pwrmon_lib::{AdcRange, Averaging, Command, ConversionTime, HardwareParams, MeasurementConfig, Rig};
use pwrmon_rs::logging::{ConsoleStyle, setup_logging};
use pwrmon_rs::sim::{SimHandle, dac_code_for, spawn_alert_source};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info, warn};

/// Boot the simulated power monitor rig and stream telemetry reports from it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Conversion time code (3 = 280 µs ... 7 = 4120 µs)
    #[arg(short, long, default_value = "3", value_parser = parse_conversion_time)]
    conversion_time: ConversionTime,
    /// Averaging code (0 = 1 ... 7 = 1024 samples)
    #[arg(short, long, default_value = "0", value_parser = parse_averaging)]
    averaging: Averaging,
    /// Use the ±40.96 mV shunt range
    #[arg(long)]
    narrow: bool,
    /// Apply limit comparisons to averaged values
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    alert_on_average: bool,
    /// Number of reports to collect
    #[arg(short = 'n', long, default_value_t = 4)]
    batches: u64,
    /// Simulated battery voltage in volts
    #[arg(long, default_value_t = 3.8)]
    sim_voltage: f32,
    /// Simulated load resistance in ohms
    #[arg(long, default_value_t = 38.0)]
    load_ohms: f32,
    /// Print reports as JSON lines
    #[arg(long)]
    json: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn parse_conversion_time(s: &str) -> Result<ConversionTime, String> {
    let code: u8 = s.parse().map_err(|e| format!("{e}"))?;
    ConversionTime::try_from(code).map_err(|_| format!("conversion time code must be 3..=7, got {code}"))
}

fn parse_averaging(s: &str) -> Result<Averaging, String> {
    let code: u8 = s.parse().map_err(|e| format!("{e}"))?;
    Averaging::try_from(code).map_err(|_| format!("averaging code must be 0..=7, got {code}"))
}

impl Cli {
    fn measurement_config(&self) -> MeasurementConfig {
        MeasurementConfig {
            conversion_time: self.conversion_time,
            averaging: self.averaging,
            adc_range: if self.narrow { AdcRange::Narrow } else { AdcRange::Wide },
            alert_on_average: self.alert_on_average,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose, ConsoleStyle::for_json_output(cli.json))?;

    if let Err(e) = run(cli).await {
        error!("Session failed: {:?}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.measurement_config();
    info!(%config, batches = cli.batches, "starting simulated rig");

    let sim = SimHandle::new(cli.load_ohms);
    let (mut host, transport, commands) = channel_link(16);

    let mut rig = Rig::new(sim.bus(), sim.board(), transport, HardwareParams::default());
    rig.init().await;
    let alert_source = spawn_alert_source(sim.clone(), rig.alert_context());
    let rig_task = tokio::spawn(async move {
        rig.run(commands).await;
        rig
    });

    // a batch takes 256 alert periods; leave room for slow configurations
    let batch_time = Duration::from_micros(config.alert_period_us() as u64 * REPORT_SAMPLES as u64);
    host.set_timeout(batch_time * 2 + Duration::from_millis(RESET_DELAY_MS as u64 + 1000));

    let session = host_session(&mut host, &cli, config).await;

    drop(host);
    let rig = rig_task.await.context("rig task panicked")?;
    alert_source.abort();

    let stats = rig.stats();
    info!(
        conversions = sim.conversions(),
        alerts = stats.alerts,
        published = stats.published,
        overruns = stats.overruns,
        "session finished"
    );
    session
}

async fn host_session(host: &mut HostLink, cli: &Cli, config: MeasurementConfig) -> Result<()> {
    let response = host.request(Command::WriteConfig(MeasurementConfigRaw::from(config))).await?;
    if !response.ok {
        bail!("device rejected configuration {}", config);
    }

    let code = dac_code_for(cli.sim_voltage);
    let response = host.request(Command::SetSimVoltage(code)).await?;
    if !response.ok {
        bail!("device rejected simulator code {code}");
    }
    host.request(Command::SetSimOutput(true)).await?;

    host.send(Command::StartMeasure).await?;
    info!("measurement started");

    let mut expected = 0;
    for _ in 0..cli.batches {
        let batch = host.recv_report().await.context("waiting for report")?;
        if batch.sequence_id != expected {
            warn!(
                expected,
                got = batch.sequence_id,
                "sequence gap, {} report(s) lost",
                batch.sequence_id.saturating_sub(expected)
            );
        }
        expected = batch.sequence_id + 1;

        if cli.json {
            let line = json!({
                "sequence_id": batch.sequence_id,
                "samples": batch.len(),
                "voltage_v": batch.voltage_stats(),
                "current_a": batch.current_stats(),
                "mean_power_w": batch.power_w().sum::<f64>() / batch.len().max(1) as f64,
            });
            println!("{line}");
        } else {
            println!("{batch}");
        }
    }

    host.send(Command::StopMeasure).await?;
    host.request(Command::SetSimOutput(false)).await?;

    let response = host.request(Command::ReadConfig).await?;
    if let Some((raw, hw)) = response.config {
        match MeasurementConfig::try_from(raw) {
            Ok(active) => info!(config = %active, supply_v = hw.supply_v, r_shunt = hw.r_shunt, "device configuration"),
            Err(e) => warn!(error = %e, "device reported an invalid configuration"),
        }
    }
    Ok(())
}
