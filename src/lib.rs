pub mod checksum;
pub mod protocol;
pub mod store;

pub use protocol::{Client, TransferServer};
pub use store::FileStore;
