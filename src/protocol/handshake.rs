//! Job request and handshake exchanges

use super::codec::{Command, BANNER_MAX_LEN, RESPONSE_MAX_LEN};
use super::connection::Connection;
use crate::{Error, Job, JobStatus, Result, Username};
use std::time::Duration;
use tracing::{debug, info};

/// What the server told us during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// Version banner, informational only
    pub server_version: String,
    /// Job handed out during the handshake
    pub job: Job,
    /// Status returned for the acknowledgment
    pub status: JobStatus,
}

/// Ask the pool for a job on behalf of `username`
pub async fn request_job(conn: &mut Connection, username: &Username) -> Result<Job> {
    conn.send(Command::Job(username.clone())).await?;
    let payload = conn.recv(RESPONSE_MAX_LEN).await?;
    Ok(Job::new(payload.trim()))
}

/// Submit a result and read the pool's verdict.
///
/// `INVU` is turned into [`Error::InvalidUsername`].
pub async fn submit_answer(
    conn: &mut Connection,
    username: &Username,
    answer: Command,
) -> Result<JobStatus> {
    conn.send(answer).await?;
    let status = JobStatus::parse(&conn.recv(RESPONSE_MAX_LEN).await?);
    if status.is_invalid_username() {
        return Err(Error::invalid_username(username.as_str()));
    }
    Ok(status)
}

/// Banner, `JOB,<username>`, job, `0`, status.
pub async fn perform(conn: &mut Connection, username: &Username) -> Result<HandshakeOutcome> {
    let server_version = conn.recv(BANNER_MAX_LEN).await?.trim().to_string();
    info!(peer = conn.peer(), "Server version: {}", server_version);

    let job = request_job(conn, username).await?;
    debug!(peer = conn.peer(), "Handshake job: {}", job);

    let status = submit_answer(conn, username, Command::Ack).await?;
    debug!(peer = conn.peer(), "Handshake status: {}", status);

    Ok(HandshakeOutcome {
        server_version,
        job,
        status,
    })
}

/// [`perform`] bounded by `limit`; a server that stalls mid-handshake
/// yields [`Error::Timeout`].
pub async fn perform_within(
    conn: &mut Connection,
    username: &Username,
    limit: Duration,
) -> Result<HandshakeOutcome> {
    let peer = conn.peer().to_string();
    tokio::time::timeout(limit, perform(conn, username))
        .await
        .map_err(|_| Error::timeout(format!("handshake with {}", peer)))?
}
