pub mod provider;
pub mod providers;
pub mod registry;
pub mod reply;
pub mod sse_parser;
pub mod tools;
pub mod types;
