//! In-process Modbus TCP controller
//!
//! Serves FC03 and FC16 over one holding-register bank. A silent simulator
//! keeps accepting connections but never answers, which clients see as a
//! request timeout.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

#[derive(Debug, Default)]
struct Bank {
    base: u16,
    registers: Vec<u16>,
    silent: bool,
    requests: usize,
}

impl Bank {
    /// Index range for `quantity` registers at protocol address `address`
    fn span(&self, address: u16, quantity: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::from(address.checked_sub(self.base)?);
        let end = start.checked_add(quantity)?;
        (end <= self.registers.len()).then_some(start..end)
    }

    fn handle(&mut self, pdu: &[u8]) -> Vec<u8> {
        self.requests += 1;
        let word = |i: usize| u16::from_be_bytes([pdu[i], pdu[i + 1]]);
        let function = pdu[0];
        match function {
            0x03 if pdu.len() >= 5 => {
                let quantity = word(3);
                if quantity == 0 || quantity > 125 {
                    return vec![function | 0x80, ILLEGAL_DATA_VALUE];
                }
                let Some(range) = self.span(word(1), usize::from(quantity)) else {
                    return vec![function | 0x80, ILLEGAL_DATA_ADDRESS];
                };
                let mut out = vec![function, (quantity * 2) as u8];
                for value in &self.registers[range] {
                    out.extend_from_slice(&value.to_be_bytes());
                }
                out
            },
            0x10 if pdu.len() >= 6 => {
                let quantity = usize::from(word(3));
                if quantity == 0 || pdu.len() < 6 + quantity * 2 {
                    return vec![function | 0x80, ILLEGAL_DATA_VALUE];
                }
                let Some(range) = self.span(word(1), quantity) else {
                    return vec![function | 0x80, ILLEGAL_DATA_ADDRESS];
                };
                let start = range.start;
                for i in 0..quantity {
                    self.registers[start + i] = word(6 + i * 2);
                }
                pdu[..5].to_vec()
            },
            _ => vec![function | 0x80, ILLEGAL_FUNCTION],
        }
    }
}

pub struct ModbusSimulator {
    addr: SocketAddr,
    bank: Arc<Mutex<Bank>>,
    token: CancellationToken,
}

impl ModbusSimulator {
    /// Listen on an ephemeral localhost port with `size` registers at `base`
    pub async fn start(base: u16, size: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bank = Arc::new(Mutex::new(Bank {
            base,
            registers: vec![0; size],
            ..Default::default()
        }));
        let token = CancellationToken::new();

        let accept_bank = bank.clone();
        let accept_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_token.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        tokio::spawn(serve(stream, accept_bank.clone(), accept_token.clone()));
                    },
                }
            }
        });

        Self { addr, bank, token }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn register(&self, offset: usize) -> u16 {
        self.bank.lock().registers[offset]
    }

    pub fn set_register(&self, offset: usize, value: u16) {
        self.bank.lock().registers[offset] = value;
    }

    pub fn set_registers(&self, offset: usize, values: &[u16]) {
        self.bank.lock().registers[offset..offset + values.len()].copy_from_slice(values);
    }

    /// Stop answering requests
    pub fn set_silent(&self, silent: bool) {
        self.bank.lock().silent = silent;
    }

    pub fn requests(&self) -> usize {
        self.bank.lock().requests
    }
}

impl Drop for ModbusSimulator {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn serve(mut stream: TcpStream, bank: Arc<Mutex<Bank>>, token: CancellationToken) {
    loop {
        let mut header = [0u8; 7];
        tokio::select! {
            _ = token.cancelled() => return,
            read = stream.read_exact(&mut header) => {
                if read.is_err() {
                    return;
                }
            },
        }
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        if length < 2 {
            return;
        }
        let mut pdu = vec![0u8; length - 1];
        if stream.read_exact(&mut pdu).await.is_err() {
            return;
        }

        let response = {
            let mut bank = bank.lock();
            if bank.silent {
                continue;
            }
            bank.handle(&pdu)
        };

        let mut frame = Vec::with_capacity(7 + response.len());
        frame.extend_from_slice(&header[..4]);
        frame.extend_from_slice(&((response.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&response);
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }
}
