mod bus;
mod cache;
mod database;
mod kv_store;
mod shutdown;

pub use bus::*;
pub use cache::*;
pub use database::*;
pub use kv_store::*;
pub use shutdown::ShutdownSignal;
