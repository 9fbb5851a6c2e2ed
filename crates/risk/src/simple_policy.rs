// In crates/risk/src/simple_policy.rs

use crate::types::MarginSettings;
use crate::{Error, MarginPolicy, Result};
use core_types::ProductType;
use num_traits::FromPrimitive;
use rust_decimal::Decimal;

/// Fixed leverage per product and a flat brokerage rate.
#[derive(Debug, Clone)]
pub struct SimpleMarginPolicy {
    intraday_leverage: Decimal,
    carryforward_leverage: Decimal,
    delivery_leverage: Decimal,
    fee_rate: Decimal,
}

impl SimpleMarginPolicy {
    /// Creates a new `SimpleMarginPolicy` instance from its settings.
    pub fn new(settings: &MarginSettings) -> Result<Self> {
        Ok(Self {
            intraday_leverage: positive("intraday_leverage", settings.intraday_leverage)?,
            carryforward_leverage: positive("carryforward_leverage", settings.carryforward_leverage)?,
            delivery_leverage: positive("delivery_leverage", settings.delivery_leverage)?,
            fee_rate: non_negative("fee_rate", settings.fee_rate)?,
        })
    }

    /// No leverage and no fees: every fill blocks its full traded value.
    pub fn cash_only() -> Self {
        Self {
            intraday_leverage: Decimal::ONE,
            carryforward_leverage: Decimal::ONE,
            delivery_leverage: Decimal::ONE,
            fee_rate: Decimal::ZERO,
        }
    }
}

fn to_decimal(field: &str, value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| Error::InvalidParameters(format!("{} is not a finite number", field)))
}

fn positive(field: &str, value: f64) -> Result<Decimal> {
    let value = to_decimal(field, value)?;
    if value <= Decimal::ZERO {
        return Err(Error::InvalidParameters(format!("{} must be positive", field)));
    }
    Ok(value)
}

fn non_negative(field: &str, value: f64) -> Result<Decimal> {
    let value = to_decimal(field, value)?;
    if value < Decimal::ZERO {
        return Err(Error::InvalidParameters(format!("{} must not be negative", field)));
    }
    Ok(value)
}

impl MarginPolicy for SimpleMarginPolicy {
    fn name(&self) -> &'static str {
        "SimpleMarginPolicy"
    }

    fn leverage(&self, product: ProductType) -> Decimal {
        match product {
            ProductType::Intraday => self.intraday_leverage,
            ProductType::CarryForward => self.carryforward_leverage,
            ProductType::Delivery => self.delivery_leverage,
        }
    }

    fn fee(&self, price: Decimal, quantity: Decimal) -> Result<Decimal> {
        price
            .checked_mul(quantity)
            .and_then(|value| value.checked_mul(self.fee_rate))
            .ok_or_else(|| crate::out_of_range(price, quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_types::{Exchange, Fund, NewOrder, OrderType, Side, Symbol, UserId};
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn settings() -> MarginSettings {
        MarginSettings {
            intraday_leverage: 5.0,
            carryforward_leverage: 2.0,
            delivery_leverage: 1.0,
            fee_rate: 0.001,
        }
    }

    #[rstest]
    #[case(ProductType::Intraday, dec!(200))]
    #[case(ProductType::CarryForward, dec!(500))]
    #[case(ProductType::Delivery, dec!(1000))]
    fn test_required_margin_per_product(#[case] product: ProductType, #[case] expected: Decimal) {
        let policy = SimpleMarginPolicy::new(&settings()).unwrap();
        assert_eq!(policy.required_margin(product, dec!(100), dec!(10)).unwrap(), expected);
    }

    #[test]
    fn test_fee_is_fraction_of_traded_value() {
        let policy = SimpleMarginPolicy::new(&settings()).unwrap();
        assert_eq!(policy.fee(dec!(250), dec!(4)).unwrap(), dec!(1));
    }

    #[test]
    fn test_non_positive_leverage_is_invalid() {
        let mut bad = settings();
        bad.intraday_leverage = 0.0;
        assert!(matches!(
            SimpleMarginPolicy::new(&bad),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_admission_vetoes_unaffordable_order() {
        let policy = SimpleMarginPolicy::cash_only();
        let fund = Fund::new(UserId("u1".into()), dec!(1000), Utc::now());
        let mut order = NewOrder {
            user_id: UserId("u1".into()),
            symbol: Symbol("SBIN".into()),
            exchange: Exchange("NSE".into()),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity: dec!(10),
            limit_price: None,
            trigger_price: None,
            product: ProductType::Delivery,
        };
        assert!(policy.check_admission(&order, dec!(100), &fund).is_ok());

        order.quantity = dec!(11);
        let err = policy.check_admission(&order, dec!(100), &fund).unwrap_err();
        assert!(matches!(err, Error::Vetoed { .. }));
        assert!(matches!(
            core_types::Error::from(err),
            core_types::Error::LedgerConsistency(_)
        ));
    }

    #[test]
    fn test_oversized_order_is_out_of_range_not_a_panic() {
        let policy = SimpleMarginPolicy::new(&settings()).unwrap();
        let fund = Fund::new(UserId("u1".into()), dec!(1000), Utc::now());
        let order = NewOrder {
            user_id: UserId("u1".into()),
            symbol: Symbol("SBIN".into()),
            exchange: Exchange("NSE".into()),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(100000000000000000000),
            limit_price: Some(dec!(10000000000)),
            trigger_price: None,
            product: ProductType::Delivery,
        };

        assert!(matches!(
            policy.required_margin(ProductType::Delivery, Decimal::MAX, dec!(2)),
            Err(Error::OutOfRange(_))
        ));
        let err = policy
            .check_admission(&order, dec!(10000000000), &fund)
            .unwrap_err();
        assert!(matches!(err, Error::OutOfRange(_)));
        assert!(matches!(
            core_types::Error::from(err),
            core_types::Error::Validation(_)
        ));
    }
}
