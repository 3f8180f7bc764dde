//! UPDI programmer for tinyAVR 0/1-series, over a plain serial adapter.

pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod protocol;
pub mod transport;
pub mod updi;

pub use self::device::{ChipDB, Device, Segment};
pub use self::error::{Error, Result};
pub use self::flashing::Flashing;
pub use self::format::MemoryImage;
pub use self::protocol::Command;
pub use self::transport::Transport;
pub use self::updi::Updi;
