pub mod hosted;

pub use hosted::HostedProvider;
