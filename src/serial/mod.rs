pub mod encoding;
pub mod port;

pub use port::{
    COMMON_BAUD_RATES, PortSettings, SerialChannel, SerialLineReader, SerialWriter,
};
