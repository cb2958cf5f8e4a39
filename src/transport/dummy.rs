use std::fmt::Write;

use async_trait::async_trait;

use super::{SerialTransport, TransportError};
use crate::models;

/// Transport logging frames instead of writing them to a device
pub struct DummyTransport {
    mode: models::DummyMode,
    port: Option<String>,
    str_buf: String,
}

impl DummyTransport {
    pub fn new(config: &models::Dummy) -> Self {
        Self {
            mode: config.mode,
            port: None,
            str_buf: String::new(),
        }
    }

    fn format(&mut self, data: &[u8]) -> std::fmt::Result {
        self.str_buf.clear();

        match self.mode {
            models::DummyMode::Text => {
                for byte in data {
                    write!(self.str_buf, "{:02X}", byte)?;
                }
            }

            models::DummyMode::Ansi => {
                // Render every byte triplet as a truecolor block
                for rgb in data.chunks_exact(3) {
                    write!(
                        self.str_buf,
                        "\x1B[38;2;{red};{green};{blue}m█",
                        red = rgb[0],
                        green = rgb[1],
                        blue = rgb[2]
                    )?;
                }

                write!(self.str_buf, "\x1B[0m")?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SerialTransport for DummyTransport {
    async fn open(&mut self, port: &str) -> Result<(), TransportError> {
        info!(port = %port, "opened dummy port");
        self.port = Some(port.to_owned());
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(port) = self.port.take() {
            info!(port = %port, "closed dummy port");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.port.is_none() {
            return Err(TransportError::NotConnected);
        }

        if self.format(data).is_ok() {
            info!(len = %data.len(), "{}", &self.str_buf);
        }

        Ok(())
    }

    fn list_ports(&self) -> Result<Vec<String>, TransportError> {
        Ok(vec!["dummy".to_owned()])
    }
}
