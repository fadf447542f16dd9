//! Cooperative main loop: command dispatch and report flushing.

use crate::config::HardwareParams;
use crate::constants::{DAC_DEFAULT_CODE, DEVICE_ID_INA229, MANUFACTURER_ID_TI};
use crate::hal::{Board, RegisterBus, Transport};
use crate::monitor::PowerMonitor;
use crate::pipeline::{AlertContext, ReportQueue, StatsSnapshot, report_pipeline};
use crate::processor::CommandProcessor;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zerocopy::IntoBytes;

pub struct Rig<B, H, T> {
    alert: Arc<AlertContext<B>>,
    processor: CommandProcessor<B, H>,
    reports: ReportQueue,
    transport: T,
    last_overruns: u64,
}

impl<B, H, T> Rig<B, H, T>
where
    B: RegisterBus + Send,
    H: Board + Send,
    T: Transport,
{
    pub fn new(bus: B, board: H, transport: T, hw: HardwareParams) -> Self {
        let (sampler, reports) = report_pipeline();
        let alert = Arc::new(AlertContext::new(PowerMonitor::new(bus), sampler));
        let processor = CommandProcessor::new(alert.clone(), board, hw);
        Self {
            alert,
            processor,
            reports,
            transport,
            last_overruns: 0,
        }
    }

    /// Handle for the alert interrupt
    pub fn alert_context(&self) -> Arc<AlertContext<B>> {
        self.alert.clone()
    }

    pub fn processor(&self) -> &CommandProcessor<B, H> {
        &self.processor
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.reports.stats()
    }

    /// Bring the board into a known state: monitor reset and configured,
    /// simulator at its default code with the output off, pipeline stopped.
    pub async fn init(&mut self) {
        let (manufacturer, device) = self.alert.with_monitor(|m| m.identify());
        if manufacturer != MANUFACTURER_ID_TI || device != DEVICE_ID_INA229 {
            warn!(
                manufacturer = format_args!("{manufacturer:#06x}"),
                device = format_args!("{device:#06x}"),
                "unexpected power monitor id"
            );
        } else {
            info!(
                manufacturer = format_args!("{manufacturer:#06x}"),
                device = format_args!("{device:#06x}"),
                "power monitor found"
            );
        }

        self.processor.stop_measure();
        self.processor.reset().await;
        self.processor.apply_config().await;
        self.processor.set_sim_output(false);
        self.processor.set_sim_code(DAC_DEFAULT_CODE);
        info!(config = %self.processor.config(), "rig initialized");
    }

    /// Run until the command channel closes.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Bytes>) {
        info!("main loop running");
        loop {
            tokio::select! {
                biased;
                _ = self.reports.ready() => self.flush_reports().await,
                frame = commands.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame).await,
                    None => break,
                },
            }
        }
        // whatever completed before the host went away still goes out
        self.flush_reports().await;
        info!(stats = ?self.reports.stats(), "main loop stopped");
    }

    pub async fn handle_frame(&mut self, frame: &[u8]) {
        let Some(response) = self.processor.process(frame).await else {
            return;
        };
        if let Err(e) = self.transport.send_response(&response.to_bytes()).await {
            error!(error = %e, "failed to send response");
        }
    }

    /// Send every published frame; each returns to the pool after its send completes.
    pub async fn flush_reports(&mut self) {
        while let Some(lease) = self.reports.next_ready() {
            let sequence_id = lease.sequence_id.get();
            match self.transport.send_report(lease.as_bytes()).await {
                Ok(()) => debug!(sequence_id, "report sent"),
                Err(e) => error!(sequence_id, error = %e, "failed to send report"),
            }
        }

        let overruns = self.reports.stats().overruns;
        if overruns > self.last_overruns {
            warn!(
                dropped = overruns - self.last_overruns,
                total = overruns,
                "report overrun"
            );
            self.last_overruns = overruns;
        }
    }
}
