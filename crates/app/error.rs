use chain5j_common::EcdsaError;
use chain5j_storage::error::StoreError;

/// Errors produced by transaction validation and execution.
///
/// The taxonomy drives handling: permanent errors drop the transaction,
/// transient ones keep it queued, execution errors are recorded in the
/// receipt, and fatal errors abort the block.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid account signature")]
    InvalidSigner,
    #[error("bad signature: {0}")]
    Ecdsa(#[from] EcdsaError),
    #[error("from account not found")]
    FromAccountNotFound,
    #[error("to account not found")]
    ToAccountNotFound,
    #[error("frozen account")]
    FrozenAccount,
    #[error("balance not enough")]
    BalanceNotEnough,
    #[error("invalid account operation")]
    InvalidAccountOp,
    #[error("invalid interpreter")]
    InvalidInterpreter,
    #[error("tx size is over")]
    TxTooLarge,
    #[error("tx nonce too low")]
    NonceTooLow,
    #[error("nonce too high")]
    NonceTooHigh,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized")]
    Unauthorized,

    #[error("account already exists")]
    AccountExists,
    #[error("account not exists")]
    AccountNotExists,
    #[error("address already exists")]
    AddressExists,
    #[error("register account balance must be zero")]
    InvalidBalance,
    #[error("register account nonce must be zero")]
    InvalidNonce,
    #[error("invalid account name length")]
    InvalidAccountNameLen,
    #[error("invalid account name format")]
    InvalidAccountNameFormat,
    #[error("invalid domain length")]
    InvalidDomainLen,
    #[error("invalid domain format")]
    InvalidDomainFormat,
    #[error("invalid domain")]
    InvalidDomain,
    #[error("invalid permission")]
    InvalidPermission,
    #[error("can't register admin user")]
    InvalidAdminField,
    #[error("domain already exists")]
    DomainExists,
    #[error("domain not exists")]
    DomainNotFound,
    #[error("invalid contract")]
    InvalidContract,

    #[error("unsupported role type")]
    UnsupportedRole,
    #[error("from address is not a node admin")]
    NotNodeAdmin,

    /// Block-gas sentinel: the pool cannot fund another transaction.
    /// Never reverts state; the prepare loop aborts cleanly.
    #[error("gas limit reached")]
    GasLimitReached,
    #[error("out of gas")]
    OutOfGas,
    #[error("state nonce {state} does not match tx nonce {tx}")]
    NonceMismatch { state: u64, tx: u64 },

    #[error("insufficient balance to pay for gas")]
    InsufficientBalanceForGas,
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("vm error: {0}")]
    Vm(String),
}

impl AppError {
    /// Transient errors keep the transaction queued awaiting earlier state.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::NonceTooHigh)
    }

    /// Fatal errors abort the whole block.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::InsufficientBalanceForGas | AppError::Store(_)
        )
    }
}

/// Transaction-pool ingress and bookkeeping failures.
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    #[error("transaction duplicate")]
    TxDuplicate,
    #[error("unsupported tx type")]
    TxType,
    #[error("tx pool is full")]
    PoolFull,
    #[error("replacement transaction underpriced")]
    ReplaceUnderpriced,
    #[error("pool lock poisoned: {0}")]
    LockPoisoned(String),
    #[error(transparent)]
    App(#[from] AppError),
}
