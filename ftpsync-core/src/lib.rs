mod client;
mod listing;

pub use client::{DEFAULT_PORT, FtpClient, FtpError, ReplyClass, with_default_port};
pub use listing::{Entry, EntryType, parse_list_line};
