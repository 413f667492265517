use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use anyhow::Context;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use thiserror::Error;

use crate::inverter::Exchange;
use crate::record::{BusAddress, RawResponse};

const BAUD_RATE: u32 = 9600;
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimum time the inverter needs between a command and its reply.
const SETTLE_TIME: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("serial port {device} unavailable")]
    PortUnavailable {
        device: String,
        #[source]
        source: serialport::Error,
    },
    #[error("insufficient privilege to open {device}")]
    InsufficientPrivilege {
        device: String,
        #[source]
        source: serialport::Error,
    },
}

pub(crate) fn command_frame(address: BusAddress) -> String {
    format!("#{address}0\r\n")
}

/// The RS-485 line shared by every inverter on the bus. The port is
/// released when this value is dropped.
pub(crate) struct SerialLine {
    device: String,
    port: Box<dyn SerialPort>,
    settle: Duration,
}

impl SerialLine {
    pub(crate) fn open(device: &str) -> Result<Self, SerialError> {
        let port = serialport::new(device, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|source| match source.kind() {
                serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
                    SerialError::InsufficientPrivilege {
                        device: device.to_owned(),
                        source,
                    }
                }
                _ => SerialError::PortUnavailable {
                    device: device.to_owned(),
                    source,
                },
            })?;
        log::debug!("Opened {device} at {BAUD_RATE} baud");

        let mut line = SerialLine {
            device: device.to_owned(),
            port,
            settle: SETTLE_TIME,
        };
        if let Err(e) = line.port.clear(ClearBuffer::All) {
            log::debug!("Failed to flush {} after open ({e})", line.device);
        }
        Ok(line)
    }

    #[cfg(test)]
    fn from_port(device: &str, port: Box<dyn SerialPort>, settle: Duration) -> Self {
        SerialLine {
            device: device.to_owned(),
            port,
            settle,
        }
    }

    pub(crate) fn close(self) {
        log::debug!("Closing {}", self.device);
    }

    fn transfer(&mut self, address: BusAddress) -> anyhow::Result<RawResponse> {
        self.port
            .clear(ClearBuffer::All)
            .context("Failed to flush serial buffers")?;

        let command = command_frame(address);
        log::debug!("[{address}] Sending command {:?}", command.trim_end());
        self.port
            .write_all(command.as_bytes())
            .context("Failed to write command")?;
        self.port.flush().context("Failed to flush command")?;

        std::thread::sleep(self.settle);

        let mut bytes = Vec::new();
        loop {
            let pending = self
                .port
                .bytes_to_read()
                .context("Failed to query pending bytes")?;
            if pending == 0 {
                break;
            }
            let mut chunk = vec![0; pending as usize];
            let read = self.port.read(&mut chunk).context("Failed reading response")?;
            chunk.truncate(read);
            bytes.extend_from_slice(&chunk);
        }

        let response = RawResponse::from_bytes(&bytes);
        log::trace!("[{address}] Received {:?}", response.as_str());
        Ok(response)
    }
}

impl Exchange for SerialLine {
    fn exchange(&mut self, address: BusAddress) -> RawResponse {
        match self.transfer(address) {
            Ok(response) => response,
            Err(e) => {
                log::debug!("[{address}] Exchange failed ({e:#})");
                RawResponse::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_layout() {
        let address = BusAddress::new(3).unwrap();
        assert_eq!(command_frame(address), "#030\r\n");
        let address = BusAddress::new(12).unwrap();
        assert_eq!(command_frame(address), "#120\r\n");
    }

    #[test]
    fn exchange_over_pseudo_terminal() {
        const REPLY: &[u8] = b"noise*010 0 1 2 3 4 5 6 7 8 \xe9 1 5.3\r";

        let (mut inverter, host) = serialport::TTYPort::pair().unwrap();
        inverter.set_timeout(Duration::from_secs(2)).unwrap();
        let device = std::thread::spawn(move || {
            let mut command = [0u8; 6];
            inverter.read_exact(&mut command).unwrap();
            inverter.write_all(REPLY).unwrap();
            inverter.flush().unwrap();
            (command, inverter)
        });

        let mut line = SerialLine::from_port("pty", Box::new(host), Duration::from_millis(300));
        let address = BusAddress::new(1).unwrap();
        let response = line.exchange(address);
        let (command, _inverter) = device.join().unwrap();

        assert_eq!(&command, b"#010\r\n");
        assert_eq!(response.as_str(), "noise*010 0 1 2 3 4 5 6 7 8 \u{e9} 1 5.3\r");
        let record = crate::record::InverterRecord::parse(&response, address).unwrap();
        assert_eq!(record.checksum, 0xe9);
        line.close();
    }

    #[test]
    fn missing_device_is_unavailable() {
        match SerialLine::open("/nonexistent/ttyKACO") {
            Err(SerialError::PortUnavailable { device, .. }) => {
                assert_eq!(device, "/nonexistent/ttyKACO")
            }
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("opened a missing device"),
        }
    }
}
