pub mod app_state;
pub mod cache;
pub mod client;
pub mod diagnostic;
pub mod pipeline;
pub mod prompt;
pub mod router;
pub mod schema;
pub mod security;
pub mod store;
#[cfg(test)]
pub mod testing;
