// Proxies: building them and using them

pub mod builder;
pub mod handle;

pub use builder::{ProxyBuilder, ProxySettings};
pub use handle::ProxyHandle;
