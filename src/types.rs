//! Core types for pool mining
//!
//! Small validated value types shared by the protocol, sessions and the pool
//! controller.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status sent by the pool when the username is unknown
pub const INVALID_USERNAME: &str = "INVU";

/// Pool server address as published by the endpoint resolver
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The degraded value returned when resolution fails
    pub fn unresolved() -> Self {
        Self {
            host: String::new(),
            port: 0,
        }
    }

    /// Empty host or zero port means resolution failed
    pub fn is_resolved(&self) -> bool {
        !self.host.trim().is_empty() && self.port != 0
    }

    /// Parse the two-line `host\nport` document served by the endpoint file.
    ///
    /// Any malformed input yields [`ServerEndpoint::unresolved`].
    pub fn from_lines(text: &str) -> Self {
        let mut lines = text.lines().map(str::trim);
        let host = lines.next().unwrap_or_default();
        let port = lines
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(0);

        if host.is_empty() || port == 0 {
            return Self::unresolved();
        }
        Self::new(host, port)
    }

    /// `host:port` form accepted by `TcpStream::connect`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_resolved() {
            write!(f, "{}:{}", self.host, self.port)
        } else {
            write!(f, "<unresolved>")
        }
    }
}

/// Pool account name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Create a validated username.
    ///
    /// The pool uses `,` as its field separator, so the name must not contain
    /// one, nor any whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::config("Username must not be empty"));
        }
        if name.contains(',') || name.chars().any(char::is_whitespace) {
            return Err(Error::config(format!(
                "Username '{}' must not contain ',' or whitespace",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Get the username string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Username {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.trim())
    }
}

impl TryFrom<String> for Username {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job description received from the pool; opaque to the session itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    payload: String,
}

impl Job {
    /// Create a job from its raw payload
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Raw payload text
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Comma-separated fields of the payload
    pub fn fields(&self) -> Vec<&str> {
        self.payload.split(',').map(str::trim).collect()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.payload)
    }
}

/// Status line returned after an answer is submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Good,
    Bad,
    InvalidUsername,
    Other(String),
}

impl JobStatus {
    /// Classify a raw status response
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "GOOD" => JobStatus::Good,
            "BAD" => JobStatus::Bad,
            INVALID_USERNAME => JobStatus::InvalidUsername,
            other => JobStatus::Other(other.to_string()),
        }
    }

    /// Whether the pool rejected the username
    pub fn is_invalid_username(&self) -> bool {
        matches!(self, JobStatus::InvalidUsername)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Good => write!(f, "GOOD"),
            JobStatus::Bad => write!(f, "BAD"),
            JobStatus::InvalidUsername => write!(f, "{}", INVALID_USERNAME),
            JobStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Index of a session slot in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub usize);

impl SessionId {
    /// Create a new session id
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the slot index
    pub fn value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
