pub mod connection;
pub mod engine;
pub mod folder_cache;
pub mod listing;
pub mod paths;
pub mod queue;
pub mod session;
pub mod supervisor;
#[cfg(test)]
pub(crate) mod test_support;
