//! Interrupt-driven acquisition pipeline.
//!
//! The [`Sampler`] runs in alert-interrupt context. Completed report frames move
//! to the main loop through a lock-free ready queue and come back through a free
//! queue once the transport is done with them, so the interrupt never writes into
//! a frame that is still being sent. When no free frame is available the completed
//! batch is dropped and counted as an overrun.
//!
//! The sampler shares the register bus with the main loop. Both live in an
//! [`AlertContext`], a critical-section mutex: the alert handler holds it for the
//! whole interrupt, the main loop only around single register transactions and
//! run-state changes.

use crate::config::ScaleFactors;
use crate::constants::{REPORT_POOL_SIZE, REPORT_SAMPLES};
use crate::hal::RegisterBus;
use crate::monitor::PowerMonitor;
use crate::report::ReportFrame;
use crate::sample::to_micro;
use critical_section::Mutex;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::cell::RefCell;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Stopped,
    Armed,
    /// Armed run held while the monitor is reconfigured; alerts are ignored.
    Paused,
}

/// Counters shared between the two contexts
#[derive(Debug, Default)]
pub struct PipelineStats {
    alerts: AtomicU64,
    ignored_alerts: AtomicU64,
    published: AtomicU64,
    overruns: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub alerts: u64,
    pub ignored_alerts: u64,
    pub published: u64,
    pub overruns: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            alerts: self.alerts.load(Ordering::Relaxed),
            ignored_alerts: self.ignored_alerts.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

/// Build a sampler and its report queue over a pool of [`REPORT_POOL_SIZE`] frames.
pub fn report_pipeline() -> (Sampler, ReportQueue) {
    let (ready_tx, ready_rx) = HeapRb::<Box<ReportFrame>>::new(REPORT_POOL_SIZE).split();
    let (mut free_tx, free_rx) = HeapRb::<Box<ReportFrame>>::new(REPORT_POOL_SIZE).split();

    // one frame starts in the sampler, the rest wait in the free queue
    for _ in 1..REPORT_POOL_SIZE {
        let _ = free_tx.push(ReportFrame::boxed());
    }

    let stats = Arc::new(PipelineStats::default());
    let ready_signal = Arc::new(Notify::new());

    let sampler = Sampler {
        state: RunState::Stopped,
        scales: ScaleFactors::default(),
        index: 0,
        sequence_id: 0,
        filling: Some(ReportFrame::boxed()),
        ready_tx,
        free_rx,
        stats: stats.clone(),
        ready_signal: ready_signal.clone(),
    };
    let queue = ReportQueue {
        ready_rx,
        free_tx,
        stats,
        ready_signal,
    };
    (sampler, queue)
}

/// Interrupt-side half of the pipeline
pub struct Sampler {
    state: RunState,
    scales: ScaleFactors,
    index: usize,
    sequence_id: u64,
    filling: Option<Box<ReportFrame>>,
    ready_tx: HeapProducer<Box<ReportFrame>>,
    free_rx: HeapConsumer<Box<ReportFrame>>,
    stats: Arc<PipelineStats>,
    ready_signal: Arc<Notify>,
}

impl Sampler {
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn scales(&self) -> ScaleFactors {
        self.scales
    }

    pub fn sample_index(&self) -> usize {
        self.index
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Frame currently being filled
    pub fn filling_frame(&self) -> Option<&ReportFrame> {
        self.filling.as_deref()
    }

    /// Start (or restart) a measurement run with the given scales.
    pub fn arm(&mut self, scales: ScaleFactors) {
        self.scales = scales;
        self.index = 0;
        self.sequence_id = 0;
        self.state = RunState::Armed;
    }

    /// Stop the run; the partial batch is discarded.
    pub fn disarm(&mut self) {
        self.state = RunState::Stopped;
        self.index = 0;
    }

    /// Hold an armed run. The partial batch is discarded, the sequence id kept.
    /// Returns false when there was no run to hold.
    pub fn pause(&mut self) -> bool {
        if self.state != RunState::Armed {
            return false;
        }
        self.state = RunState::Paused;
        self.index = 0;
        true
    }

    /// Continue a paused run with new scales, starting a fresh batch.
    pub fn resume(&mut self, scales: ScaleFactors) {
        if self.state != RunState::Paused {
            return;
        }
        self.scales = scales;
        self.index = 0;
        self.state = RunState::Armed;
    }

    /// Alert handler body: acknowledge, read, decode, store, publish when full.
    pub fn on_alert<B: RegisterBus>(&mut self, monitor: &mut PowerMonitor<B>) {
        if self.state != RunState::Armed {
            self.stats.ignored_alerts.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats.alerts.fetch_add(1, Ordering::Relaxed);

        // The status read clears the alert whatever its source.
        let _ = monitor.read_status();
        let (vbus, current) = monitor.read_sample_pair();

        if self.filling.is_none() {
            self.filling = self.free_rx.pop();
        }
        let Some(frame) = self.filling.as_mut() else {
            return;
        };

        let voltage_uv = to_micro(vbus.scaled(self.scales.bus_voltage_lsb));
        let current_ua = to_micro(current.scaled(self.scales.current_lsb));
        frame.set_sample(self.index, voltage_uv, current_ua);

        self.index += 1;
        if self.index == REPORT_SAMPLES {
            self.complete_batch();
        }
    }

    fn complete_batch(&mut self) {
        let sequence_id = self.sequence_id;
        self.sequence_id += 1;
        self.index = 0;

        let Some(next) = self.free_rx.pop() else {
            // the consumer still holds every other frame; refill this one
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let Some(mut full) = self.filling.replace(next) else {
            return;
        };
        full.stamp(sequence_id);
        // queue capacity equals the pool size, a push can only fail on a lost frame
        if self.ready_tx.push(full).is_err() {
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        self.ready_signal.notify_one();
    }
}

/// Main-loop half of the pipeline
pub struct ReportQueue {
    ready_rx: HeapConsumer<Box<ReportFrame>>,
    free_tx: HeapProducer<Box<ReportFrame>>,
    stats: Arc<PipelineStats>,
    ready_signal: Arc<Notify>,
}

impl ReportQueue {
    /// Wait for the "batch ready" signal. A signal raised while nobody waits is kept.
    pub async fn ready(&self) {
        self.ready_signal.notified().await;
    }

    /// Take the oldest published frame. It returns to the pool when the lease drops.
    pub fn next_ready(&mut self) -> Option<ReportLease<'_>> {
        let frame = self.ready_rx.pop()?;
        Some(ReportLease {
            frame: Some(frame),
            free_tx: &mut self.free_tx,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// A published frame on loan to the main loop
pub struct ReportLease<'a> {
    frame: Option<Box<ReportFrame>>,
    free_tx: &'a mut HeapProducer<Box<ReportFrame>>,
}

impl Deref for ReportLease<'_> {
    type Target = ReportFrame;

    fn deref(&self) -> &ReportFrame {
        self.frame
            .as_deref()
            .unwrap_or_else(|| unreachable!("lease frame is only taken on drop"))
    }
}

impl Drop for ReportLease<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            let _ = self.free_tx.push(frame);
        }
    }
}

struct AlertShared<B> {
    monitor: PowerMonitor<B>,
    sampler: Sampler,
}

/// State touched by the alert interrupt, guarded by a critical section
pub struct AlertContext<B> {
    inner: Mutex<RefCell<AlertShared<B>>>,
}

impl<B: RegisterBus> AlertContext<B> {
    pub fn new(monitor: PowerMonitor<B>, sampler: Sampler) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(AlertShared { monitor, sampler })),
        }
    }

    /// Alert interrupt entry point
    pub fn on_alert(&self) {
        critical_section::with(|cs| {
            let mut shared = self.inner.borrow_ref_mut(cs);
            let AlertShared { monitor, sampler } = &mut *shared;
            sampler.on_alert(monitor);
        });
    }

    /// Run `f` on the monitor with the alert interrupt masked.
    pub fn with_monitor<R>(&self, f: impl FnOnce(&mut PowerMonitor<B>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).monitor))
    }

    /// Run `f` on the sampler with the alert interrupt masked.
    pub fn with_sampler<R>(&self, f: impl FnOnce(&mut Sampler) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).sampler))
    }
}
