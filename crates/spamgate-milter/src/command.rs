//! Milter commands sent by the MTA.

use std::net::IpAddr;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::negotiate::Negotiation;

/// A decoded MTA → filter command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `O` - option negotiation
    Negotiate(Negotiation),
    /// `D` - macro definitions for an upcoming command
    Macro {
        /// Command the macros belong to
        for_command: u8,
    },
    /// `C` - client connected
    Connect {
        /// Client hostname as resolved by the MTA
        hostname: String,
        /// Client address; `None` for unix-socket or unknown peers
        peer: Option<IpAddr>,
    },
    /// `H` - HELO/EHLO
    Helo {
        /// Greeting argument
        hostname: String,
    },
    /// `M` - MAIL FROM
    Mail {
        /// Sender followed by ESMTP parameters
        args: Vec<String>,
    },
    /// `R` - RCPT TO
    Rcpt {
        /// Recipient followed by ESMTP parameters
        args: Vec<String>,
    },
    /// `T` - DATA
    Data,
    /// `L` - one header field
    Header {
        /// Field name
        name: String,
        /// Field value, unfolded bytes as the MTA sent them
        value: Bytes,
    },
    /// `N` - end of headers
    EndOfHeaders,
    /// `B` - body chunk
    Body(Bytes),
    /// `E` - end of message, possibly with a final body chunk
    EndOfMessage(Bytes),
    /// `A` - abort the current message
    Abort,
    /// `U` - unrecognized SMTP command
    Unknown(String),
    /// `Q` - quit
    Quit,
    /// `K` - quit, keep the connection for a new client
    QuitNewConnection,
}

impl Command {
    /// Decodes a command from its code byte and payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for unknown codes or malformed payloads.
    pub fn decode(code: u8, payload: Bytes) -> Result<Self> {
        let command = match code {
            b'O' => Self::Negotiate(Negotiation::decode(&payload)?),
            b'D' => Self::Macro {
                for_command: payload.first().copied().unwrap_or_default(),
            },
            b'C' => decode_connect(&payload)?,
            b'H' => Self::Helo {
                hostname: first_string(&payload),
            },
            b'M' => Self::Mail {
                args: strings(&payload),
            },
            b'R' => Self::Rcpt {
                args: strings(&payload),
            },
            b'T' => Self::Data,
            b'L' => decode_header(payload)?,
            b'N' => Self::EndOfHeaders,
            b'B' => Self::Body(payload),
            b'E' => Self::EndOfMessage(payload),
            b'A' => Self::Abort,
            b'U' => Self::Unknown(first_string(&payload)),
            b'Q' => Self::Quit,
            b'K' => Self::QuitNewConnection,
            other => {
                return Err(Error::protocol(format!(
                    "unknown command {:?}",
                    char::from(other)
                )));
            }
        };
        Ok(command)
    }

    /// Returns true if the MTA waits for a reply to this command.
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        !matches!(
            self,
            Self::Macro { .. } | Self::Abort | Self::Quit | Self::QuitNewConnection
        )
    }
}

/// Splits a payload into NUL-terminated strings.
fn strings(payload: &[u8]) -> Vec<String> {
    payload
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

fn first_string(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

/// `hostname\0 family [port address\0]`
fn decode_connect(payload: &[u8]) -> Result<Command> {
    let split = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::protocol("connect: unterminated hostname"))?;
    let hostname = String::from_utf8_lossy(&payload[..split]).into_owned();
    let rest = &payload[split + 1..];

    let peer = match rest.first() {
        Some(b'4' | b'6') if rest.len() >= 3 => {
            let address = first_string(&rest[3..]);
            let address = address.strip_prefix("IPv6:").unwrap_or(&address);
            address.parse().ok()
        }
        Some(b'4' | b'6') => return Err(Error::protocol("connect: truncated address")),
        _ => None,
    };

    Ok(Command::Connect { hostname, peer })
}

/// `name\0value\0`
fn decode_header(payload: Bytes) -> Result<Command> {
    let split = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::protocol("header: unterminated name"))?;
    let name = String::from_utf8_lossy(&payload[..split]).into_owned();
    let mut value = payload.slice(split + 1..);
    if value.last() == Some(&0) {
        value.truncate(value.len() - 1);
    }
    Ok(Command::Header { name, value })
}
