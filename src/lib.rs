pub mod config;
pub mod daemon;
pub mod mirror;
pub mod paths;
pub mod protocol;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_support;
