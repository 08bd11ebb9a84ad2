use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::PaymentError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    // 以最小单位存储，例如人民币分、美分
    pub amount: i64,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Currency {
    CNY,
    USD,
    EUR,
    GBP,
    JPY,
}

impl Currency {
    /// 最小单位的小数位数
    pub fn exponent(&self) -> u32 {
        match self {
            Self::JPY => 0,
            _ => 2,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::CNY | Self::JPY => "¥",
            Self::USD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
        }
    }
}

impl Money {
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn cny(amount: i64) -> Self {
        Self::new(amount, Currency::CNY)
    }

    pub fn usd(amount: i64) -> Self {
        Self::new(amount, Currency::USD)
    }

    /// 按主单位解析，例如支付宝的 "50.00"；出现不足最小单位的部分时报错
    pub fn from_major_str(value: &str, currency: Currency) -> Result<Self, PaymentError> {
        let major: Decimal = value
            .trim()
            .parse()
            .map_err(|_| PaymentError::Internal(format!("无法解析金额: {}", value)))?;

        let minor = major
            .checked_mul(Decimal::from(10i64.pow(currency.exponent())))
            .ok_or_else(|| PaymentError::Internal(format!("金额溢出: {}", value)))?;
        if minor.fract() != Decimal::ZERO {
            return Err(PaymentError::Internal(format!(
                "金额精度超出 {} 最小单位: {}",
                currency, value
            )));
        }

        let amount = i64::try_from(minor.trunc())
            .map_err(|_| PaymentError::Internal(format!("金额溢出: {}", value)))?;

        Ok(Self { amount, currency })
    }

    /// 主单位字符串，精度固定为币种小数位
    pub fn to_major_string(&self) -> String {
        Decimal::new(self.amount, self.currency.exponent()).to_string()
    }

    /// 同币种相加，币种不同或溢出时报错
    pub fn checked_add(&self, other: &Self) -> Result<Self, PaymentError> {
        self.combine(other, i64::checked_add)
    }

    pub fn checked_sub(&self, other: &Self) -> Result<Self, PaymentError> {
        self.combine(other, i64::checked_sub)
    }

    fn combine(
        &self,
        other: &Self,
        op: fn(i64, i64) -> Option<i64>,
    ) -> Result<Self, PaymentError> {
        if self.currency != other.currency {
            return Err(PaymentError::Internal(format!(
                "币种不一致: {} / {}",
                self.currency, other.currency
            )));
        }
        let amount = op(self.amount, other.amount)
            .ok_or_else(|| PaymentError::Internal(format!("金额溢出: {} / {}", self, other)))?;
        Ok(Self::new(amount, self.currency))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.currency.symbol(), self.to_major_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_arithmetic() {
        let paid = Money::cny(1000);
        let refunded = Money::cny(300);
        assert_eq!(paid.checked_add(&refunded).unwrap(), Money::cny(1300));
        assert_eq!(paid.checked_sub(&refunded).unwrap(), Money::cny(700));

        assert!(paid.checked_add(&Money::usd(200)).is_err());
        assert!(Money::cny(i64::MAX).checked_add(&Money::cny(1)).is_err());
        assert!(Money::cny(i64::MIN).checked_sub(&Money::cny(1)).is_err());
    }

    #[test]
    fn test_major_unit_conversion() {
        assert_eq!(Money::cny(5000).to_major_string(), "50.00");
        assert_eq!(Money::cny(1).to_major_string(), "0.01");
        assert_eq!(Money::new(1200, Currency::JPY).to_major_string(), "1200");

        assert_eq!(Money::from_major_str("50.00", Currency::CNY).unwrap().amount, 5000);
        assert_eq!(Money::from_major_str("0.1", Currency::CNY).unwrap().amount, 10);
        assert_eq!(Money::from_major_str("1200", Currency::JPY).unwrap().amount, 1200);
    }

    #[test]
    fn test_fractional_minor_unit_rejected() {
        assert!(Money::from_major_str("10.005", Currency::CNY).is_err());
        assert!(Money::from_major_str("1.5", Currency::JPY).is_err());
        assert!(Money::from_major_str("abc", Currency::CNY).is_err());

        // 乘以最小单位倍数时超出 Decimal 范围
        assert!(matches!(
            Money::from_major_str("79228162514264337593543950335", Currency::CNY),
            Err(PaymentError::Internal(_))
        ));
        // Decimal 能表示但超出 i64
        assert!(Money::from_major_str("92233720368547758.08", Currency::CNY).is_err());
    }

    #[test]
    fn test_display_format() {
        assert_eq!(format!("{}", Money::cny(1050)), "¥10.50");
        assert_eq!(format!("{}", Money::usd(1999)), "$19.99");
    }
}
