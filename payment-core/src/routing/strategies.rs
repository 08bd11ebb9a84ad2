use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::RoutingStrategy;
use crate::config::RouterConfig;
use crate::error::PaymentError;
use crate::models::payment::{ChannelConfig, RouteContext};

pub const AVAILABILITY_FIRST: &str = "availability_first";
pub const COST_BASED: &str = "cost_based";
pub const SUCCESS_RATE_WEIGHTED: &str = "success_rate_weighted";

/// 渠道历史成功率来源
pub trait SuccessRateSource: Send + Sync {
    /// 0.0 ~ 1.0，没有数据时返回 None
    fn success_rate(&self, channel_code: &str) -> Option<f64>;
}

/// 固定成功率表
#[derive(Debug, Clone, Default)]
pub struct StaticSuccessRates {
    rates: HashMap<String, f64>,
}

impl StaticSuccessRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, channel_code: &str, rate: f64) -> Self {
        self.rates.insert(channel_code.to_string(), rate.clamp(0.0, 1.0));
        self
    }
}

impl SuccessRateSource for StaticSuccessRates {
    fn success_rate(&self, channel_code: &str) -> Option<f64> {
        self.rates.get(channel_code).copied()
    }
}

/// 优先级高者在前，同优先级按编码升序
fn by_priority(a: &ChannelConfig, b: &ChannelConfig) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.code.cmp(&b.code))
}

/// 渠道手续费 = 金额 × 费率 / 100，精确计算
pub fn channel_cost(amount: i64, channel: &ChannelConfig) -> Decimal {
    Decimal::from(amount) * channel.rate_percent / Decimal::ONE_HUNDRED
}

fn enabled<'a>(candidates: &[&'a ChannelConfig]) -> Result<Vec<&'a ChannelConfig>, PaymentError> {
    let enabled: Vec<&ChannelConfig> = candidates.iter().copied().filter(|c| c.enabled).collect();
    if enabled.is_empty() {
        return Err(PaymentError::NoActiveChannels);
    }
    Ok(enabled)
}

/// 可用优先: 启用渠道中优先级最高者
#[derive(Debug, Default)]
pub struct AvailabilityFirst;

impl RoutingStrategy for AvailabilityFirst {
    fn name(&self) -> &str {
        AVAILABILITY_FIRST
    }

    fn select<'a>(
        &self,
        _ctx: &RouteContext,
        candidates: &[&'a ChannelConfig],
    ) -> Result<&'a ChannelConfig, PaymentError> {
        enabled(candidates)?
            .into_iter()
            .min_by(|a, b| by_priority(a, b))
            .ok_or(PaymentError::NoActiveChannels)
    }
}

/// 成本优先: 手续费最低者，相同时优先级高者
#[derive(Debug, Default)]
pub struct CostBased;

impl RoutingStrategy for CostBased {
    fn name(&self) -> &str {
        COST_BASED
    }

    fn select<'a>(
        &self,
        ctx: &RouteContext,
        candidates: &[&'a ChannelConfig],
    ) -> Result<&'a ChannelConfig, PaymentError> {
        enabled(candidates)?
            .into_iter()
            .min_by(|a, b| {
                channel_cost(ctx.amount, a)
                    .cmp(&channel_cost(ctx.amount, b))
                    .then_with(|| by_priority(a, b))
            })
            .ok_or(PaymentError::NoActiveChannels)
    }
}

/// 成功率加权: score = w_cost × cost_score + w_rate × success_rate
///
/// `cost_score` 为最低手续费与本渠道手续费之比，落在 0~1；
/// 本渠道手续费为 0 时记 1。
pub struct SuccessRateWeighted {
    cost_weight: f64,
    success_rate_weight: f64,
    default_success_rate: f64,
    source: Arc<dyn SuccessRateSource>,
}

impl SuccessRateWeighted {
    pub fn new(config: &RouterConfig, source: Arc<dyn SuccessRateSource>) -> Self {
        Self {
            cost_weight: config.cost_weight,
            success_rate_weight: config.success_rate_weight,
            default_success_rate: config.default_success_rate,
            source,
        }
    }

    fn score(&self, cost: Decimal, min_cost: Decimal, channel: &ChannelConfig) -> f64 {
        let cost_score = if cost.is_zero() {
            1.0
        } else {
            (min_cost / cost).to_f64().unwrap_or(0.0)
        };
        let success_rate = self
            .source
            .success_rate(&channel.code)
            .unwrap_or(self.default_success_rate);

        self.cost_weight * cost_score + self.success_rate_weight * success_rate
    }
}

impl RoutingStrategy for SuccessRateWeighted {
    fn name(&self) -> &str {
        SUCCESS_RATE_WEIGHTED
    }

    fn select<'a>(
        &self,
        ctx: &RouteContext,
        candidates: &[&'a ChannelConfig],
    ) -> Result<&'a ChannelConfig, PaymentError> {
        let enabled = enabled(candidates)?;

        let costs: Vec<Decimal> = enabled.iter().map(|c| channel_cost(ctx.amount, c)).collect();
        let min_cost = costs.iter().copied().min().unwrap_or(Decimal::ZERO);

        enabled
            .into_iter()
            .zip(costs)
            .map(|(channel, cost)| (channel, self.score(cost, min_cost, channel)))
            // 分数高者在前，其后按优先级、编码
            .min_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then_with(|| by_priority(a, b)))
            .map(|(channel, _)| channel)
            .ok_or(PaymentError::NoActiveChannels)
    }
}
