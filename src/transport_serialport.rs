use crate::transport::{Result, SerialConnector, SerialLink, SerialSettings, TransportError};

use serialport::SerialPort;
use std::io::{Read, Write};
use tracing::{debug, info};

pub struct SerialConnectorSerialport;

impl SerialConnector for SerialConnectorSerialport {
    type Link = SerialLinkSerialport;

    fn open(&self, settings: &SerialSettings) -> Result<Self::Link> {
        let port = serialport::new(&settings.port, settings.baud)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| TransportError::Open {
                target: settings.port.clone(),
                reason: e.to_string(),
            })?;
        info!("opened {} at {} baud", settings.port, settings.baud);
        Ok(SerialLinkSerialport {
            name: settings.port.clone(),
            port: Some(port),
        })
    }
}

/// Serial port handle; the port is closed on `close()` or drop.
pub struct SerialLinkSerialport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLinkSerialport {
    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl SerialLink for SerialLinkSerialport {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let count = self.port()?.bytes_to_read().map_err(std::io::Error::from)?;
        Ok(count as usize)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let port = self.port()?;
        let count = port.bytes_to_read().map_err(std::io::Error::from)? as usize;
        let mut buf = vec![0u8; count];
        if count > 0 {
            let read = port.read(&mut buf)?;
            buf.truncate(read);
        }
        Ok(buf)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("closed {}", self.name);
        }
    }
}

impl Drop for SerialLinkSerialport {
    fn drop(&mut self) {
        if self.port.is_some() {
            debug!("releasing {} on drop", self.name);
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_port_maps_to_open_with_port_name() {
        let settings = SerialSettings::new("/dev/buzzlink-no-such-port", 9600);
        match SerialConnectorSerialport.open(&settings) {
            Err(TransportError::Open { target, reason }) => {
                assert_eq!(target, "/dev/buzzlink-no-such-port");
                assert!(!reason.is_empty());
            }
            Err(e) => panic!("expected Open, got {:?}", e),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
