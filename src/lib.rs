pub mod api;
pub mod client;
pub mod config;
pub mod profile;
pub mod push;
pub mod service_worker;
pub mod storage;
pub mod store;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_support;
