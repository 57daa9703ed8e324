//! Resumable chunked file upload: the HTTP server (chunk receiver, assembler
//! and quota oracle) and the client transfer queue that feeds it.

pub mod client;
pub mod core;
pub mod features;
pub mod modules;
pub mod shared;
