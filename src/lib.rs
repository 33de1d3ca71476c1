//! UPDI programmer for AVR microcontrollers over a serial port.

pub mod app;
pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod link;
pub mod phy;
pub mod progress;
pub mod protocol;
pub mod sequence;
pub mod timing;
pub mod transport;

pub use self::device::{Device, DeviceDB};
pub use self::error::{Error, Result};
pub use self::flashing::{Flashing, Signature, SystemInfo};
pub use self::progress::{NoProgress, Progress, ProgressBarSink};
pub use self::protocol::Command;
pub use self::sequence::{Config, HexSource, HexTarget, Step, StepOutput};
pub use self::timing::Timing;
pub use self::transport::Transport;
