//! HTTP File Server Module
//!
//! Serves a [`crate::fs::BucketFs`] over HTTP: directories render as link
//! listings, files stream their bytes with range support.

mod server;

pub use server::FileServer;
