pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod hal;
pub mod monitor;
pub mod pipeline;
pub mod processor;
pub mod register;
pub mod report;
pub mod rig;
pub mod sample;
pub mod transport;

// Re-export the types a host or board integration needs most
pub use command::{Command, CommandCode, Response};
pub use config::{AdcRange, Averaging, ConversionTime, HardwareParams, MeasurementConfig, ScaleFactors};
pub use error::PMError;
pub use report::{ReportBatch, ReportFrame};
pub use rig::Rig;
