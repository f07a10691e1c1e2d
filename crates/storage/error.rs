use chain5j_common::H256;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),
    #[error("no state stored for root {0}")]
    UnknownStateRoot(H256),
    #[error("chain has no blocks")]
    EmptyChain,
    #[error("header not found")]
    HeaderNotFound,
    #[error("{0}")]
    Custom(String),
}
