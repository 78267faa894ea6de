pub mod error;
pub mod schema;
pub mod store;

pub use error::LedgerError;
pub use store::UsageLedger;
