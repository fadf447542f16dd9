use crate::constants::{REPORT_FRAME_SIZE, REPORT_SAMPLES, REPORT_SIGNATURE};
use crate::error::PMError;
use crate::sample::from_micro;
use std::alloc::{Layout, handle_alloc_error};
use std::fmt;
use zerocopy::byteorder::little_endian::{I32, U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Telemetry report as sent on the data channel (2060 bytes, packed).
///
/// Voltages are in microvolts, currents in microamperes.
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ReportFrame {
    pub signature: U32,
    pub sequence_id: U64,
    pub voltage_uv: [I32; REPORT_SAMPLES],
    pub current_ua: [I32; REPORT_SAMPLES],
}

impl ReportFrame {
    /// Heap frame, all zero. Only called when the acquisition pool is built.
    pub fn boxed() -> Box<Self> {
        Self::new_box_zeroed().unwrap_or_else(|_| handle_alloc_error(Layout::new::<Self>()))
    }

    pub fn set_sample(&mut self, index: usize, voltage_uv: i32, current_ua: i32) {
        self.voltage_uv[index] = I32::new(voltage_uv);
        self.current_ua[index] = I32::new(current_ua);
    }

    pub fn stamp(&mut self, sequence_id: u64) {
        self.signature = U32::new(REPORT_SIGNATURE);
        self.sequence_id = U64::new(sequence_id);
    }

    pub fn is_signed(&self) -> bool {
        self.signature.get() == REPORT_SIGNATURE
    }
}

/// Report decoded into physical units
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReportBatch {
    pub sequence_id: u64,
    pub voltage_v: Vec<f64>,
    pub current_a: Vec<f64>,
}

impl ReportBatch {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PMError> {
        if bytes.len() < REPORT_FRAME_SIZE {
            return Err(PMError::InsufficientData {
                expected: REPORT_FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        let frame = ReportFrame::ref_from_bytes(&bytes[..REPORT_FRAME_SIZE])
            .map_err(|_| PMError::InvalidFrame("Failed to parse report frame".to_string()))?;
        Self::try_from(frame)
    }

    pub fn len(&self) -> usize {
        self.voltage_v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage_v.is_empty()
    }

    /// Per-sample power in watts
    pub fn power_w(&self) -> impl Iterator<Item = f64> + '_ {
        self.voltage_v.iter().zip(&self.current_a).map(|(v, i)| v * i)
    }

    pub fn voltage_stats(&self) -> Option<Stats> {
        Stats::of(&self.voltage_v)
    }

    pub fn current_stats(&self) -> Option<Stats> {
        Stats::of(&self.current_a)
    }
}

impl TryFrom<&ReportFrame> for ReportBatch {
    type Error = PMError;

    fn try_from(frame: &ReportFrame) -> Result<Self, Self::Error> {
        if !frame.is_signed() {
            return Err(PMError::BadSignature(frame.signature.get()));
        }
        Ok(Self {
            sequence_id: frame.sequence_id.get(),
            voltage_v: frame.voltage_uv.iter().map(|v| from_micro(v.get())).collect(),
            current_a: frame.current_ua.iter().map(|i| from_micro(i.get())).collect(),
        })
    }
}

/// Min / mean / max of one quantity in a batch
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stats {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

impl Stats {
    fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        Some(Self {
            min,
            mean: sum / values.len() as f64,
            max,
        })
    }
}

impl fmt::Display for ReportBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.voltage_stats(), self.current_stats()) {
            (Some(v), Some(i)) => write!(
                f,
                "#{}: V {:.4}/{:.4}/{:.4} V, I {:.6}/{:.6}/{:.6} A (min/mean/max)",
                self.sequence_id, v.min, v.mean, v.max, i.min, i.mean, i.max
            ),
            _ => write!(f, "#{}: empty", self.sequence_id),
        }
    }
}
