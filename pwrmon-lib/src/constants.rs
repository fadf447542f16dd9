// Protocol and hardware constants for the power monitor rig

/// Number of samples per quantity in one telemetry report
pub const REPORT_SAMPLES: usize = 256;

/// Magic value stamped at the start of every report frame
pub const REPORT_SIGNATURE: u32 = 0x8765_4321;

/// Size of a report frame on the wire (signature + id + two sample arrays)
pub const REPORT_FRAME_SIZE: usize = 4 + 8 + REPORT_SAMPLES * 4 * 2;

/// Number of report frames in the acquisition pool (ping-pong)
pub const REPORT_POOL_SIZE: usize = 2;

/// Size of the command header (4 bytes)
pub const COMMAND_HEADER_SIZE: usize = 4;

/// Size of the configuration payload appended to WRITE_CONFIG and config responses
pub const CONFIG_PAYLOAD_SIZE: usize = 4;

/// Size of a WRITE_CONFIG frame
pub const WRITE_CONFIG_FRAME_SIZE: usize = COMMAND_HEADER_SIZE + CONFIG_PAYLOAD_SIZE;

/// Size of a plain response frame
pub const RESPONSE_HEADER_SIZE: usize = 4;

/// Size of a READ_CONFIG / WRITE_CONFIG response (header, config, two f32 constants)
pub const CONFIG_RESPONSE_SIZE: usize = RESPONSE_HEADER_SIZE + CONFIG_PAYLOAD_SIZE + 8;

/// Bytes clocked out for a 16-bit register read (turnaround byte + 2 data bytes)
pub const REG16_READ_LEN: usize = 3;

/// Bytes clocked out for a 24-bit register read (turnaround byte + 3 data bytes)
pub const REG24_READ_LEN: usize = 4;

/// Wait after a monitor reset before it accepts configuration
pub const RESET_DELAY_MS: u32 = 200;

/// Wait after writing a configuration before reading it back
pub const CONFIG_SETTLE_MS: u32 = 10;

/// Monitor ADC supply voltage [V]
pub const ADC_VCC: f32 = 4.75;

/// Shunt resistance [Ω]
pub const R_SHUNT: f32 = 0.05;

/// SHUNT_CAL = SHUNT_CAL_SCALE x CURRENT_LSB x R_SHUNT (x4 in the narrow range)
pub const SHUNT_CAL_SCALE: f64 = 13107.2e6;

/// Current LSB [A] with ADCRANGE = 0 (±163.84 mV)
pub const CURRENT_LSB_WIDE: f32 = 0.000_006_25;
/// Shunt voltage LSB [V] with ADCRANGE = 0
pub const VSHUNT_LSB_WIDE: f32 = 0.000_000_312_5;
/// Bus voltage LSB [V] with ADCRANGE = 0
pub const VBUS_LSB_WIDE: f32 = 0.000_195_312_5;

/// Current LSB [A] with ADCRANGE = 1 (±40.96 mV)
pub const CURRENT_LSB_NARROW: f32 = 0.000_001_562_5;
/// Shunt voltage LSB [V] with ADCRANGE = 1
pub const VSHUNT_LSB_NARROW: f32 = 0.000_000_078_125;
/// Bus voltage LSB [V] with ADCRANGE = 1
pub const VBUS_LSB_NARROW: f32 = 0.000_195_312_5;

/// Expected MANUFACTURER_ID ("TI")
pub const MANUFACTURER_ID_TI: u16 = 0x5449;

/// Expected DEVICE_ID (INA229, revision 1)
pub const DEVICE_ID_INA229: u16 = 0x2291;

/// Battery simulator DAC supply voltage [V]
pub const DAC_VCC: f32 = 4.75;

/// Battery simulator DAC full scale code count (12 bit)
pub const DAC_FULL_SCALE: u16 = 4096;

/// Highest DAC code allowed (4096 * 4.2 / DAC_VCC), limits the output to 4.2 V
pub const DAC_MAX_CODE: u16 = 3622;

/// Power-on DAC code (3.8 V)
pub const DAC_DEFAULT_CODE: u16 = 3350;
