//! ==============================================================================
//! channel.rs - exclusive instrument channel
//! ==============================================================================
//!
//! purpose:
//!     owns the ONE connection to the modbus soil sensor. callers never touch
//!     the transport directly; they go through InstrumentChannel which:
//!     - closes any previous handle before opening a new one
//!     - lets exactly one read pair be in flight at a time
//!     - can be told to discard its handle so the next poll reconnects fresh
//!
//! seams:
//!     Connector         -> builds a RegisterTransport for a port (hal.rs: RTU)
//!     RegisterTransport -> one holding-register read per call
//!
//! locking:
//!     the handle has its own mutex, separate from the status store. it is held
//!     for one read pair only, never across the settle delay in open().
//!
//! ==============================================================================

use crate::domain::PortId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// register holding soil moisture in tenths of a percent
pub const MOISTURE_REGISTER: u16 = 0;
/// register holding soil temperature in tenths of a degree
pub const TEMPERATURE_REGISTER: u16 = 1;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no response from instrument")]
    NoResponse,

    #[error("invalid response from instrument: {0}")]
    InvalidResponse(String),

    #[error("serial io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    fn not_open() -> Self {
        Self::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "instrument channel is not open",
        ))
    }
}

#[async_trait]
pub trait RegisterTransport: Send + Sync {
    /// read a single holding register (function code 3)
    async fn read_holding_register(&mut self, address: u16) -> Result<u16, ChannelError>;

    /// release whatever the transport holds; best-effort
    async fn close(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, port: &PortId) -> Result<Box<dyn RegisterTransport>, ChannelError>;
}

pub struct InstrumentChannel {
    connector: Arc<dyn Connector>,
    handle: Mutex<Option<Box<dyn RegisterTransport>>>,
    settle: Duration,
    inter_read: Duration,
}

impl InstrumentChannel {
    pub fn new(connector: Arc<dyn Connector>, settle: Duration, inter_read: Duration) -> Self {
        Self { connector, handle: Mutex::new(None), settle, inter_read }
    }

    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// (re)open on `port`; always closes the previous handle first
    pub async fn open(&self, port: &PortId) -> Result<(), ChannelError> {
        let previous = self.handle.lock().await.take();
        if let Some(mut old) = previous {
            if let Err(e) = old.close().await {
                tracing::warn!("error closing previous connection: {}", e);
            }
        }

        tokio::time::sleep(self.settle).await;

        let transport = self.connector.connect(port).await?;
        *self.handle.lock().await = Some(transport);
        tracing::info!("modbus sensor initialized on {}", port);
        Ok(())
    }

    /// moisture then temperature, as one uninterrupted transaction
    pub async fn read_pair(&self) -> Result<(u16, u16), ChannelError> {
        let mut guard = self.handle.lock().await;
        let transport = guard.as_mut().ok_or_else(ChannelError::not_open)?;

        let moisture = transport.read_holding_register(MOISTURE_REGISTER).await?;
        tokio::time::sleep(self.inter_read).await;
        let temperature = transport.read_holding_register(TEMPERATURE_REGISTER).await?;

        Ok((moisture, temperature))
    }

    /// force-close and drop the handle
    pub async fn discard(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(mut transport) = handle {
            if let Err(e) = transport.close().await {
                tracing::debug!("ignoring close error on discard: {}", e);
            }
        }
    }
}

// ==============================================================================
// test doubles
// ==============================================================================
// scripted transports shared by the channel and acquisition tests.

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub type Script = Arc<std::sync::Mutex<VecDeque<Result<u16, ChannelError>>>>;

    /// hands out transports that pop results from a shared script.
    /// an empty script answers 0.
    #[derive(Default)]
    pub struct ScriptedConnector {
        pub script: Script,
        pub connects: AtomicUsize,
        pub reads: Arc<AtomicUsize>,
        pub closes: Arc<AtomicUsize>,
        pub refuse: std::sync::atomic::AtomicBool,
    }

    impl ScriptedConnector {
        pub fn push(&self, result: Result<u16, ChannelError>) {
            self.script.lock().unwrap().push_back(result);
        }

        pub fn push_pair(&self, moisture: u16, temperature: u16) {
            self.push(Ok(moisture));
            self.push(Ok(temperature));
        }

        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    struct ScriptedTransport {
        script: Script,
        reads: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RegisterTransport for ScriptedTransport {
        async fn read_holding_register(&mut self, _address: u16) -> Result<u16, ChannelError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(0))
        }

        async fn close(&mut self) -> Result<(), ChannelError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, port: &PortId) -> Result<Box<dyn RegisterTransport>, ChannelError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ChannelError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("cannot open {}", port),
                )));
            }
            Ok(Box::new(ScriptedTransport {
                script: self.script.clone(),
                reads: self.reads.clone(),
                closes: self.closes.clone(),
            }))
        }
    }
}
