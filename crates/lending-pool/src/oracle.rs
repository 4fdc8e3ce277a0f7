use crate::{PoolError, SpotOracle};
use common_types::U256;

/// Oracle returning a constant spot price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSpotOracle {
    spot: U256,
}

impl FixedSpotOracle {
    pub fn new(spot: U256) -> Self {
        Self { spot }
    }
}

impl SpotOracle for FixedSpotOracle {
    fn get_spot(&self) -> Result<U256, PoolError> {
        Ok(self.spot)
    }
}
