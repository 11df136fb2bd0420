use super::{Address, Result, SunspecError};
use async_trait::async_trait;
use std::{net::SocketAddr, time::Duration};
use tokio::time;
use tokio_modbus::{
    client::{tcp, Context, Reader, Writer},
    slave::Slave,
};

/// Where a register client connects to.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConnection {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,
}

impl DeviceConnection {
    fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| SunspecError::Config(format!("Invalid device address {}:{}: {e}", self.host, self.port)))
    }
}

/// Request/response primitive for holding registers. Addresses are 0-based wire addresses.
#[async_trait]
pub trait Transport: Send {
    async fn connect(conn: &DeviceConnection) -> Result<Self>
    where
        Self: Sized;

    async fn read_holding(&mut self, addr: Address, count: u16) -> Result<Vec<u16>>;

    async fn write_multiple(&mut self, addr: Address, words: &[u16]) -> Result<()>;
}

pub struct ModbusTcp {
    ctx: Context,
    timeout: Duration,
}

fn connection_error(e: impl ToString) -> SunspecError {
    SunspecError::Connection(e.to_string())
}

#[async_trait]
impl Transport for ModbusTcp {
    async fn connect(conn: &DeviceConnection) -> Result<Self> {
        let addr = conn.socket_addr()?;

        let ctx = time::timeout(conn.timeout, tcp::connect_slave(addr, Slave(conn.unit_id)))
            .await
            .map_err(|_| SunspecError::Connection(format!("Connecting to {addr} timed out")))?
            .map_err(connection_error)?;

        Ok(Self {
            ctx,
            timeout: conn.timeout,
        })
    }

    async fn read_holding(&mut self, addr: Address, count: u16) -> Result<Vec<u16>> {
        time::timeout(self.timeout, self.ctx.read_holding_registers(addr, count))
            .await
            .map_err(|_| SunspecError::Connection(format!("Reading {count} registers at {addr} timed out")))?
            .map_err(connection_error)?
            .map_err(connection_error)
    }

    async fn write_multiple(&mut self, addr: Address, words: &[u16]) -> Result<()> {
        time::timeout(self.timeout, self.ctx.write_multiple_registers(addr, words))
            .await
            .map_err(|_| SunspecError::Connection(format!("Writing registers at {addr} timed out")))?
            .map_err(connection_error)?
            .map_err(connection_error)
    }
}
