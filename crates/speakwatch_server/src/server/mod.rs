#![forbid(unsafe_code)]

pub mod connection;
pub mod directory;
pub mod gateway;
pub mod health;
pub mod notifier;
pub mod path;
pub mod poller;
pub mod publisher;
pub mod state_store;
pub mod supervisor;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod directory_tests;

#[cfg(test)]
mod path_tests;
