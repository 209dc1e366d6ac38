//! Local IPC for task submission.
//!
//! Clients hand task descriptors to the daemon over a Unix domain socket,
//! one JSON request and one token reply per connection.
//!
//! # Architecture
//!
//! - **Server**: Runs in the daemon, accepts connections, validates and enqueues
//! - **Client**: Connects to the daemon socket and submits one descriptor per call
//! - **Protocol**: Descriptor codec, acknowledgement tokens and bounded reads

pub mod client;
pub mod protocol;
pub mod server;

pub use client::TaskClient;
pub use protocol::{decode, encode, Ack, TaskDescriptor};
pub use server::{TaskServer, TaskServerHandle};
