pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod id_generator;
pub mod logging;
pub mod models;
pub mod notify;
pub mod order_client;
pub mod payment;
pub mod repository;
pub mod routing;
pub mod services;
pub mod signer;

pub use error::{ErrorCategory, GatewayError, PaymentError};
pub use services::TransactionManager;
