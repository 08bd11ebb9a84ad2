pub mod transaction_manager;

pub use transaction_manager::TransactionManager;
