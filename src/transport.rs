use async_trait::async_trait;
use thiserror::Error;

use crate::models;

// Transport implementation modules

mod dummy;
pub use dummy::DummyTransport;

mod serial;
pub use serial::SerialDevice;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serial port is not connected")]
    NotConnected,
    #[error("write did not complete in time")]
    Timeout,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

/// Byte stream to the LED microcontroller
#[async_trait]
pub trait SerialTransport: Send {
    /// Open the named port, closing any previously open one
    async fn open(&mut self, port: &str) -> Result<(), TransportError>;

    /// Close the port. Closing a closed port does nothing.
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Write `data` to the port
    ///
    /// Fails with [TransportError::NotConnected] if the port is not open. A
    /// failed write closes the port.
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    async fn send_str(&mut self, s: &str) -> Result<(), TransportError> {
        self.send(s.as_bytes()).await
    }

    /// true if the microcontroller sent data back
    fn has_data(&self) -> bool {
        false
    }

    /// Names of the ports this transport can open
    fn list_ports(&self) -> Result<Vec<String>, TransportError>;
}

pub fn from_config(config: &models::Transport) -> Box<dyn SerialTransport> {
    match config {
        models::Transport::Serial(serial) => Box::new(SerialDevice::new(serial)),
        models::Transport::Dummy(dummy) => Box::new(DummyTransport::new(dummy)),
    }
}

/// Serial ports available on this host
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    Ok(tokio_serial::available_ports()?
        .into_iter()
        .map(|port| port.port_name)
        .collect())
}
