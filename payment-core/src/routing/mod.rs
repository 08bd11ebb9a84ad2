use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::RouterConfig;
use crate::error::PaymentError;
use crate::models::payment::{ChannelConfig, RouteContext};

pub mod strategies;

pub use strategies::{
    AvailabilityFirst, CostBased, StaticSuccessRates, SuccessRateSource, SuccessRateWeighted,
};

/// 渠道选择策略，只依赖传入的数据
pub trait RoutingStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn select<'a>(
        &self,
        ctx: &RouteContext,
        candidates: &[&'a ChannelConfig],
    ) -> Result<&'a ChannelConfig, PaymentError>;
}

/// 按名称查找策略，未知名称回退到第一个注册的策略
pub struct ChannelRouter {
    strategies: Vec<Arc<dyn RoutingStrategy>>,
    index: HashMap<String, usize>,
    default_strategy: String,
}

impl ChannelRouter {
    pub fn new(default_strategy: impl Into<String>) -> Self {
        Self {
            strategies: Vec::new(),
            index: HashMap::new(),
            default_strategy: default_strategy.into(),
        }
    }

    /// 注册内置的三种策略，顺序: 可用优先、成本优先、成功率加权
    pub fn with_defaults(config: &RouterConfig, source: Arc<dyn SuccessRateSource>) -> Self {
        let mut router = Self::new(config.default_strategy.clone());
        router.register(Arc::new(AvailabilityFirst));
        router.register(Arc::new(CostBased));
        router.register(Arc::new(SuccessRateWeighted::new(config, source)));
        router
    }

    /// 同名策略会被替换，位置不变
    pub fn register(&mut self, strategy: Arc<dyn RoutingStrategy>) {
        let name = strategy.name().to_string();
        match self.index.get(&name) {
            Some(&pos) => self.strategies[pos] = strategy,
            None => {
                self.index.insert(name, self.strategies.len());
                self.strategies.push(strategy);
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn RoutingStrategy>, PaymentError> {
        if let Some(&pos) = self.index.get(name) {
            return Ok(self.strategies[pos].clone());
        }

        let fallback = self
            .strategies
            .first()
            .ok_or_else(|| PaymentError::StrategyNotImplemented(name.to_string()))?;

        warn!(
            requested = %name,
            fallback = %fallback.name(),
            "Unknown routing strategy, falling back"
        );
        Ok(fallback.clone())
    }

    /// 选择渠道。排除不支持该币种的渠道，指定了支付方式时只在对应类型的渠道中选择
    pub fn route<'a>(
        &self,
        strategy: Option<&str>,
        ctx: &RouteContext,
        channels: &'a [ChannelConfig],
    ) -> Result<&'a ChannelConfig, PaymentError> {
        let strategy = self.resolve(strategy.unwrap_or(&self.default_strategy))?;

        let wanted = ctx.payment_method.channel_type();
        let candidates: Vec<&ChannelConfig> = channels
            .iter()
            .filter(|c| c.channel_type.supports_currency(ctx.currency))
            .filter(|c| wanted.is_none_or(|t| c.channel_type == t))
            .collect();

        strategy.select(ctx, &candidates)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}
