//! Modbus TCP connection
//!
//! One socket per device, one request in flight at a time. The whole
//! request/response exchange runs under the request timeout.

use std::time::Duration;

use async_trait::async_trait;
use errors::{protocol_error, ColdroomError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MODBUS_RESPONSE_BUFFER_SIZE};
use crate::frame::{exception_description, FrameProcessor};
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::transport::{Connector, RegisterTransport};

/// Connected Modbus TCP client for a single unit
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    endpoint: String,
    unit_id: u8,
    request_timeout: Duration,
    frames: FrameProcessor,
    buffer: [u8; MODBUS_RESPONSE_BUFFER_SIZE],
}

impl TcpTransport {
    /// Open a TCP connection
    pub async fn connect(
        host: &str,
        port: u16,
        unit_id: u8,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let endpoint = format!("{host}:{port}");
        debug!("TCP connecting: {}", endpoint);

        match timeout(connect_timeout, TcpStream::connect(&endpoint)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", endpoint);
                Ok(Self {
                    stream,
                    endpoint,
                    unit_id,
                    request_timeout,
                    frames: FrameProcessor::new(),
                    buffer: [0; MODBUS_RESPONSE_BUFFER_SIZE],
                })
            },
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", endpoint, e);
                Err(ColdroomError::ConnectionFailed {
                    endpoint,
                    reason: e.to_string(),
                })
            },
            Err(_) => {
                warn!("TCP timeout: {}", endpoint);
                Err(ColdroomError::Timeout(endpoint))
            },
        }
    }

    /// Send a request PDU and return the validated response PDU
    pub async fn request(&mut self, pdu: &ModbusPdu) -> Result<ModbusPdu> {
        let function_code = pdu.function_code().unwrap_or(0);
        let (transaction_id, frame) = self.frames.build_frame(self.unit_id, pdu);
        let request_timeout = self.request_timeout;

        let outcome = timeout(request_timeout, self.exchange(&frame)).await;
        let len = match outcome {
            Ok(result) => result?,
            Err(_) => {
                debug!("TCP request timeout: {} tid={}", self.endpoint, transaction_id);
                return Err(ColdroomError::Timeout(self.endpoint.clone()));
            },
        };

        let response = self.frames.parse_response(
            &self.buffer[..len],
            transaction_id,
            self.unit_id,
            function_code,
        )?;
        if let Some(code) = response.exception_code() {
            warn!(
                "Modbus exception from {}: {} ({:02X})",
                self.endpoint,
                exception_description(code),
                code
            );
        }
        Ok(response)
    }

    async fn exchange(&mut self, frame: &[u8]) -> Result<usize> {
        self.stream.write_all(frame).await.map_err(|e| {
            error!("TCP TX: {}", e);
            ColdroomError::Io(e)
        })?;
        debug!("TCP TX: {}B", frame.len());

        let mut header = [0u8; MBAP_HEADER_LEN];
        self.stream.read_exact(&mut header).await.map_err(|e| {
            error!("TCP header RX: {}", e);
            ColdroomError::Io(e)
        })?;

        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        if length == 0 || length > MAX_MBAP_LENGTH {
            error!("TCP invalid len: {}", length);
            return Err(protocol_error!("Invalid TCP frame length: {}", length));
        }

        let total_size = MBAP_HEADER_LEN + length;
        self.buffer[..MBAP_HEADER_LEN].copy_from_slice(&header);
        self.stream
            .read_exact(&mut self.buffer[MBAP_HEADER_LEN..total_size])
            .await
            .map_err(|e| {
                error!("TCP PDU RX: {}", e);
                ColdroomError::Io(e)
            })?;
        debug!("TCP RX: {}B", total_size);
        Ok(total_size)
    }
}

#[async_trait]
impl RegisterTransport for TcpTransport {
    async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        let request = PduBuilder::read_holding_registers(address, quantity)?;
        self.request(&request).await?.parse_read_response(quantity)
    }

    async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let request = PduBuilder::write_multiple_registers(address, values)?;
        self.request(&request)
            .await?
            .parse_write_response(address, values.len() as u16)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Opens [`TcpTransport`]s with fixed timeouts
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        unit_id: u8,
    ) -> Result<Box<dyn RegisterTransport>> {
        let transport = TcpTransport::connect(
            host,
            port,
            unit_id,
            self.connect_timeout,
            self.request_timeout,
        )
        .await?;
        Ok(Box::new(transport))
    }
}
