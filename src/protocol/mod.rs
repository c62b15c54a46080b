//! Pool wire protocol
//!
//! Plain TCP, ASCII commands, bounded responses:
//!
//! 1. client connects, reads the version banner (at most 3 bytes)
//! 2. client writes `JOB,<username>`, reads the job
//! 3. client writes its answer (`0` during the handshake), reads the status
//!
//! A status of `INVU` means the username is unknown to the pool.

pub mod balance;
pub mod codec;
pub mod connection;
pub mod handshake;

pub use balance::BalanceQuery;
pub use codec::{Command, Framing, PoolCodec, BANNER_MAX_LEN, RESPONSE_MAX_LEN};
pub use connection::Connection;
pub use handshake::HandshakeOutcome;
