pub mod alipay;
pub mod mock;
pub mod wechat;

pub use alipay::AlipayGateway;
pub use mock::{MockBehavior, MockGateway};
pub use wechat::WechatPayGateway;
