pub mod gateway;
pub mod http_client;
pub mod providers;
pub mod registry;

pub use gateway::{CallbackParams, GatewayAdapter};
pub use registry::GatewayRegistry;
