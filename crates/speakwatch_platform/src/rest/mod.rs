#![forbid(unsafe_code)]

mod client;

pub use client::{RestClient, RestConfig};
