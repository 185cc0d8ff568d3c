//! # spamgate-mime
//!
//! Byte-level helpers for the raw header blocks exchanged with a content
//! classifier.
//!
//! Everything here works on `&[u8]` and borrows from the input: message text
//! coming back from a classifier is not guaranteed to be UTF-8, and header
//! values have to be compared and replayed byte for byte.
//!
//! ## Features
//!
//! - **Field retrieval**: anchored, case-insensitive lookup of a header field
//!   with folded continuation lines kept verbatim
//! - **Header/body split**: locate the first blank line under either line
//!   terminator convention
//!
//! ## Quick Start
//!
//! ```
//! use spamgate_mime::{retrieve_field, split_message};
//!
//! let text = b"X-Spam-Status: Yes,\r\n  hits=7.5\r\nSubject: hi\r\n\r\nbody\r\n";
//!
//! let message = split_message(text).unwrap();
//! assert_eq!(retrieve_field(message.headers, "Subject"), b"hi");
//! assert_eq!(retrieve_field(message.headers, "X-Spam-Status"), b"Yes,\r\n  hits=7.5");
//! assert_eq!(message.body, b"body\r\n");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
mod header;
mod message;

pub use error::{Error, Result};
pub use header::{find_field, field_name_eq, retrieve_field};
pub use message::{Boundary, SplitMessage, find_boundary, header_block, split_message};
