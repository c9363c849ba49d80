//! HTTP plumbing for probes: the request shapes and the client that sends
//! them.

pub mod client;
pub mod requests;

pub use client::Client;
pub use requests::{
    download::{read_body, DownloadRequest},
    ping::PingRequest,
    upload::UploadRequest,
    Request,
};
