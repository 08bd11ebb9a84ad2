pub mod enums;
pub mod payment;

pub use enums::*;
pub use payment::*;
