//! Balance query with last-known-good caching

use super::codec::{Command, RESPONSE_MAX_LEN};
use super::connection::Connection;
use crate::{Error, Result};
use tracing::{debug, warn};

/// Queries the account balance, falling back to the last good value
#[derive(Debug, Clone, Default)]
pub struct BalanceQuery {
    last_balance: f64,
}

impl BalanceQuery {
    /// Create a query with an empty (zero) cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Last successfully parsed balance
    pub fn last_balance(&self) -> f64 {
        self.last_balance
    }

    /// Send `BALA` and parse the reply.
    ///
    /// Never fails: on I/O or parse errors the cached balance is returned.
    pub async fn get_balance(&mut self, conn: &mut Connection) -> f64 {
        match Self::fetch(conn).await {
            Ok(balance) => {
                debug!(balance, "Balance updated");
                self.last_balance = balance;
            }
            Err(e) => {
                warn!(
                    cached = self.last_balance,
                    "Balance query failed, keeping cached value: {}",
                    e
                );
            }
        }
        self.last_balance
    }

    async fn fetch(conn: &mut Connection) -> Result<f64> {
        conn.send(Command::Balance).await?;
        let response = conn.recv(RESPONSE_MAX_LEN).await?;
        parse_balance(&response)
    }
}

/// Parse a decimal balance response
pub fn parse_balance(text: &str) -> Result<f64> {
    let text = text.trim();
    text.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| Error::protocol(format!("invalid balance response '{}'", text)))
}
