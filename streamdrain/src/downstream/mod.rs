//! Sinks that deliver batches over the network

mod channel_connection;
mod stream_downstream;

pub use channel_connection::{get_client, webpki_trust, HttpClient};
pub use stream_downstream::{parse_header, StreamDownstream};
