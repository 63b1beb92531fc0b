use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Address, ChainId};

/// One token on one chain, grouped with tokens on other chains under a shared
/// `symbol`. Ledger rows are denominated in the symbol's decimal unit; the
/// chain deals in integer base units (`amount * 10^decimals`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub token: Address,
    pub chain_id: ChainId,
    pub decimals: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("amount does not fit the token's base units")]
    OutOfRange,
    #[error("amount has more fractional digits than the token supports")]
    PrecisionLoss,
}

impl Asset {
    /// Converts a symbol-denominated decimal amount into integer base units.
    pub fn to_base_units(&self, amount: Decimal) -> Result<u128, UnitError> {
        let mut scaled = amount;
        scaled.rescale(u32::from(self.decimals));
        if scaled != amount {
            return Err(UnitError::PrecisionLoss);
        }

        scaled
            .mantissa()
            .to_u128()
            .ok_or(UnitError::OutOfRange)
    }

    /// Converts integer base units into the symbol-denominated decimal amount.
    pub fn from_base_units(&self, raw: i128) -> Result<Decimal, UnitError> {
        Decimal::try_from_i128_with_scale(raw, u32::from(self.decimals))
            .map_err(|_| UnitError::OutOfRange)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::TOKEN_USDC;

    fn usdc() -> Asset {
        Asset {
            symbol: "usdc".to_string(),
            token: *TOKEN_USDC,
            chain_id: ChainId::new(137),
            decimals: 6,
        }
    }

    #[test]
    fn decimal_to_base_units() {
        let asset = usdc();

        assert_eq!(Ok(100_000_000), asset.to_base_units(Decimal::new(100, 0)));
        assert_eq!(Ok(1_500_000), asset.to_base_units(Decimal::new(15, 1)));
        assert_eq!(Ok(0), asset.to_base_units(Decimal::ZERO));
    }

    #[test]
    fn base_units_to_decimal() {
        let asset = usdc();

        assert_eq!(Ok(Decimal::new(100, 0)), asset.from_base_units(100_000_000));
        assert_eq!(Ok(Decimal::new(-25, 1)), asset.from_base_units(-2_500_000));
    }

    #[test]
    fn sub_unit_precision_is_rejected() {
        let asset = usdc();

        // 0.0000001 usdc is below the 6-decimal base unit
        assert_eq!(
            Err(UnitError::PrecisionLoss),
            asset.to_base_units(Decimal::new(1, 7))
        );
    }

    #[test]
    fn negative_amounts_do_not_convert_to_base_units() {
        let asset = usdc();

        assert_eq!(
            Err(UnitError::OutOfRange),
            asset.to_base_units(Decimal::new(-1, 0))
        );
    }
}
