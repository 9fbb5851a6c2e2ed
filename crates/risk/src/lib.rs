// In crates/risk/src/lib.rs

use core_types::{Fund, NewOrder, ProductType};
use rust_decimal::Decimal;

pub mod error;
pub mod simple_policy;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use simple_policy::SimpleMarginPolicy;
pub use types::MarginSettings;

/// The universal interface for margin and fee rules.
///
/// The ledger asks the policy how much cash a fill blocks and what it costs;
/// the order-placement path asks it whether an order is affordable at all.
pub trait MarginPolicy: Send + Sync {
    /// The name of the margin policy.
    fn name(&self) -> &'static str;

    /// Leverage granted to a product. Always strictly positive.
    fn leverage(&self, product: ProductType) -> Decimal;

    /// Brokerage charged for trading `quantity` at `price`.
    ///
    /// `Err(Error::OutOfRange)` when the traded value does not fit a `Decimal`.
    fn fee(&self, price: Decimal, quantity: Decimal) -> Result<Decimal>;

    /// Margin blocked by an exposure of `quantity` at `price`.
    fn required_margin(&self, product: ProductType, price: Decimal, quantity: Decimal) -> Result<Decimal> {
        price
            .checked_mul(quantity)
            .and_then(|value| value.checked_div(self.leverage(product)))
            .ok_or_else(|| out_of_range(price, quantity))
    }

    /// Pre-trade check against the user's free cash.
    ///
    /// # Arguments
    ///
    /// * `order`: The order about to be placed.
    /// * `reference_price`: Best estimate of the fill price (limit price or last tick).
    /// * `fund`: The user's current fund state.
    ///
    /// # Returns
    ///
    /// * `Ok(())`: If the order could be filled with the cash available now.
    /// * `Err(Error::Vetoed)`: If margin plus fees exceed the available cash.
    /// * `Err(Error::OutOfRange)`: If the order's value cannot be represented.
    fn check_admission(&self, order: &NewOrder, reference_price: Decimal, fund: &Fund) -> Result<()> {
        let margin = self.required_margin(order.product, reference_price, order.quantity)?;
        let fee = self.fee(reference_price, order.quantity)?;
        let needed = margin
            .checked_add(fee)
            .ok_or_else(|| out_of_range(reference_price, order.quantity))?;
        if needed > fund.available_cash {
            return Err(Error::Vetoed {
                reason: format!(
                    "Insufficient funds: required {}, available {}",
                    needed.round_dp(2),
                    fund.available_cash.round_dp(2)
                ),
            });
        }
        Ok(())
    }
}

pub(crate) fn out_of_range(price: Decimal, quantity: Decimal) -> Error {
    Error::OutOfRange(format!("{} at {} exceeds the representable order value", quantity, price))
}
