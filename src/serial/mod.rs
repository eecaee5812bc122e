pub mod driver;
#[cfg(test)]
pub mod mock;
pub mod transport;

pub use driver::ScpiDriver;
pub use transport::{SerialTransport, Transport};
