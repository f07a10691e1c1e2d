use std::time::Duration;

/// Flat gas charged by every non-EVM interpreter and the base cost of an
/// EVM call.
pub const TX_GAS_COST: u64 = 21_000;
/// Base cost of a contract-creating transaction.
pub const TX_CREATE_GAS_COST: u64 = 53_000;
/// Per-byte cost of non-zero calldata.
pub const TX_DATA_NON_ZERO_GAS: u64 = 68;
/// Per-byte cost of zero calldata.
pub const TX_DATA_ZERO_GAS_COST: u64 = 4;

/// Delay before a lost-account recovery claim may succeed: two days.
pub const LOST_FOUND_INTERVAL: u64 = 2 * 86_400;

/// Deadline applied to read-only `call` executions.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);
