pub mod receipt;

pub use receipt::{write_receipt, PublishReceipt};
