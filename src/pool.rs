//! Fixed-size connection pool.
//!
//! Idle `may_postgres` clients sit in a bounded crossbeam channel; acquiring
//! one takes it out of the channel and dropping the guard puts it back. Each
//! checkout owns its connection exclusively, which is what lets a counter
//! reservation keep its `BEGIN ... COMMIT` on one session while other
//! callers use the remaining connections.

use crate::config::DatabaseConfig;
use crate::connection::{configure_session, connect, ConnectionError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use may_postgres::Client;
use std::ops::Deref;
use std::time::Duration;

pub struct ConnectionPool {
    idle_tx: Sender<Client>,
    idle_rx: Receiver<Client>,
    size: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Open `max_connections` sessions eagerly
    pub fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        let size = config.max_connections.max(1);
        let (idle_tx, idle_rx) = bounded(size);

        for _ in 0..size {
            let client = connect(&config.url)?;
            configure_session(&client, config.statement_timeout_ms)?;
            idle_tx
                .send(client)
                .map_err(|_| ConnectionError::Other("pool channel closed".to_string()))?;
        }

        log::info!("Opened connection pool with {size} connection(s)");
        Ok(Self {
            idle_tx,
            idle_rx,
            size,
            acquire_timeout: Duration::from_secs(config.pool_timeout_seconds),
        })
    }

    /// Check out a connection, waiting up to the configured pool timeout
    pub fn acquire(&self) -> Result<PooledClient<'_>, ConnectionError> {
        match self.idle_rx.recv_timeout(self.acquire_timeout) {
            Ok(client) => Ok(PooledClient { client: Some(client), pool: self }),
            Err(RecvTimeoutError::Timeout) => Err(ConnectionError::Other(format!(
                "no connection available within {}s (pool size {})",
                self.acquire_timeout.as_secs(),
                self.size
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ConnectionError::Other("pool channel closed".to_string()))
            }
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections currently checked in
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }
}

/// A checked-out connection, returned to the pool on drop
pub struct PooledClient<'a> {
    client: Option<Client>,
    pool: &'a ConnectionPool,
}

impl PooledClient<'_> {
    pub fn client(&self) -> &Client {
        self
    }
}

impl Deref for PooledClient<'_> {
    type Target = Client;

    fn deref(&self) -> &Client {
        match &self.client {
            Some(client) => client,
            None => unreachable!("client is only taken in drop"),
        }
    }
}

impl Drop for PooledClient<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if self.pool.idle_tx.try_send(client).is_err() {
                log::warn!("Connection pool full on check-in; dropping connection");
            }
        }
    }
}
