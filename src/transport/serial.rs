use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use super::{SerialTransport, TransportError};
use crate::models;

pub struct SerialDevice {
    baud_rate: u32,
    state: PortState,
}

enum PortState {
    Closed,
    Open { name: String, stream: SerialStream },
}

impl SerialDevice {
    pub fn new(config: &models::Serial) -> Self {
        Self {
            baud_rate: config.baud_rate,
            state: PortState::Closed,
        }
    }
}

#[async_trait]
impl SerialTransport for SerialDevice {
    async fn open(&mut self, port: &str) -> Result<(), TransportError> {
        if let PortState::Open { name, .. } = &self.state {
            if name == port {
                return Ok(());
            }
        }

        self.close().await;

        let stream = tokio_serial::new(port, self.baud_rate).open_native_async()?;
        info!(port = %port, baud_rate = %self.baud_rate, "opened serial port");

        self.state = PortState::Open {
            name: port.to_owned(),
            stream,
        };

        Ok(())
    }

    async fn close(&mut self) {
        if let PortState::Open { name, mut stream } =
            std::mem::replace(&mut self.state, PortState::Closed)
        {
            if let Err(error) = stream.shutdown().await {
                debug!(port = %name, error = %error, "error while closing serial port");
            }

            info!(port = %name, "closed serial port");
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.state, PortState::Open { .. })
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let result = match &mut self.state {
            PortState::Open { stream, .. } => {
                let result = stream.write_all(data).await;
                match result {
                    Ok(()) => stream.flush().await,
                    Err(error) => Err(error),
                }
            }
            PortState::Closed => return Err(TransportError::NotConnected),
        };

        if let Err(error) = result {
            // Reopened by the next call to open
            self.close().await;
            return Err(error.into());
        }

        Ok(())
    }

    fn has_data(&self) -> bool {
        match &self.state {
            PortState::Open { stream, .. } => stream.bytes_to_read().map(|n| n > 0).unwrap_or(false),
            PortState::Closed => false,
        }
    }

    fn list_ports(&self) -> Result<Vec<String>, TransportError> {
        super::list_ports()
    }
}
