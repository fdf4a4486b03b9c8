//! The one message a measured server process sends back.
//!
//! Each measured process opens a single TCP connection to the port in its descriptor, writes one JSON document and
//! closes the connection. The orchestrator reads until end of stream, so no framing is needed.

use std::{
    io::{self, Read, Write},
    net::{Ipv4Addr, Shutdown, TcpStream},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of one measured process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// One score per measurement window, in nanoseconds per operation, in completion order.
    RunResult {
        /// Measurement scores.
        scores: Vec<f64>,
    },
    /// The function never reached its checkpoint within the host's per-chain command budget.
    BudgetExceeded,
}

/// Errors produced while reading a message.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The connection failed while reading.
    #[error("could not read result: {0}")]
    Io(#[from] io::Error),
    /// The message was not valid JSON.
    #[error("could not decode result: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Connects to the orchestrator on `port` and sends `message`.
///
/// # Errors
///
/// Fails if the connection cannot be made or the message cannot be written.
pub fn send(port: u16, message: &Message) -> io::Result<()> {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;
    serde_json::to_writer(&mut stream, message)?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)
}

/// Reads one message to the end of `reader`.
///
/// Returns `Ok(None)` when the peer closed without writing anything.
///
/// # Errors
///
/// Fails on i/o errors and on bytes that are not a [`Message`].
pub fn receive(mut reader: impl Read) -> Result<Option<Message>, ReceiveError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&bytes)?))
}
