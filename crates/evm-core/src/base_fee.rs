//! Where: after each sealed block / What: the EIP-1559 base fee of the next
//! block / Why: pool admission and `eth_gasPrice` price against it.

use crate::config::{BASE_FEE_MAX_CHANGE_DENOMINATOR, ELASTICITY_MULTIPLIER};
use std::cmp::Ordering;

/// Next block's base fee from the parent's fee and gas usage. A full
/// parent always raises it by at least one wei.
pub fn compute_next_base_fee(base_fee: u64, gas_used: u64, block_gas_limit: u64) -> u64 {
    let target = block_gas_limit / ELASTICITY_MULTIPLIER;
    if target == 0 {
        return base_fee;
    }
    let step = |gas_delta: u64| {
        u128::from(base_fee) * u128::from(gas_delta)
            / u128::from(target)
            / u128::from(BASE_FEE_MAX_CHANGE_DENOMINATOR)
    };
    let next = match gas_used.cmp(&target) {
        Ordering::Equal => return base_fee,
        Ordering::Greater => u128::from(base_fee) + step(gas_used - target).max(1),
        Ordering::Less => u128::from(base_fee) - step(target - gas_used),
    };
    u64::try_from(next).unwrap_or(u64::MAX)
}
