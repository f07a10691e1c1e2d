//! The EVM execution capability.
//!
//! Bytecode execution is external to the state application; this module
//! defines the [`Vm`] seam the interpreters drive, plus the message and
//! block-context types crossing it. [`NoopVm`] is the default wiring for
//! nodes running without contract support and the base for test doubles.

use bytes::Bytes;
use chain5j_common::{Address, U256};
use tokio_util::sync::CancellationToken;

use crate::state::StateView;

/// Message derived from a transaction (or a read-only call) for the VM.
#[derive(Debug, Clone)]
pub struct VmMessage {
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub input: Bytes,
    /// Read-only calls skip the nonce pre-check.
    pub check_nonce: bool,
}

/// Per-block environment handed to the VM.
#[derive(Debug, Clone, Default)]
pub struct VmBlockContext {
    pub coinbase: Address,
    pub height: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// The only VM error that aborts the block.
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("out of gas")]
    OutOfGas,
    #[error("execution cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Result of a VM run. A present `error` marks the receipt failed but, with
/// the exception of [`VmError::InsufficientBalance`], does not fail the
/// block.
#[derive(Debug)]
pub struct VmOutcome {
    pub return_data: Bytes,
    pub gas_left: u64,
    pub error: Option<VmError>,
}

pub trait Vm: Send + Sync {
    fn create(
        &self,
        state: &mut dyn StateView,
        block: &VmBlockContext,
        msg: &VmMessage,
        gas: u64,
    ) -> VmOutcome;

    fn call(
        &self,
        state: &mut dyn StateView,
        block: &VmBlockContext,
        msg: &VmMessage,
        to: Address,
        gas: u64,
    ) -> VmOutcome;

    /// Interrupts an in-flight execution; used by deadline-bounded calls.
    fn cancel(&self);
}

/// VM that executes nothing: transfers succeed, creations produce empty
/// code, and no gas beyond the intrinsic charge is consumed.
#[derive(Debug, Default)]
pub struct NoopVm {
    cancelled: CancellationToken,
}

impl NoopVm {
    pub fn new() -> Self {
        Self::default()
    }

    fn outcome(&self, gas: u64) -> VmOutcome {
        if self.cancelled.is_cancelled() {
            return VmOutcome {
                return_data: Bytes::new(),
                gas_left: gas,
                error: Some(VmError::Cancelled),
            };
        }
        VmOutcome {
            return_data: Bytes::new(),
            gas_left: gas,
            error: None,
        }
    }
}

impl Vm for NoopVm {
    fn create(
        &self,
        _state: &mut dyn StateView,
        _block: &VmBlockContext,
        _msg: &VmMessage,
        gas: u64,
    ) -> VmOutcome {
        self.outcome(gas)
    }

    fn call(
        &self,
        state: &mut dyn StateView,
        _block: &VmBlockContext,
        msg: &VmMessage,
        to: Address,
        gas: u64,
    ) -> VmOutcome {
        if self.cancelled.is_cancelled() {
            return self.outcome(gas);
        }
        if !msg.value.is_zero() {
            if state.balance(msg.from) < msg.value {
                return VmOutcome {
                    return_data: Bytes::new(),
                    gas_left: gas,
                    error: Some(VmError::InsufficientBalance),
                };
            }
            state.sub_balance(msg.from, msg.value);
            state.add_balance(to, msg.value);
        }
        self.outcome(gas)
    }

    fn cancel(&self) {
        self.cancelled.cancel();
    }
}
