use thiserror::Error;

use crate::concurrency::TransactionId;

/// The error set surfaced by the engine core. `TransactionAborted` doubles as
/// the cancellation signal: it unwinds through the operator tree and is
/// handled by the transaction driver, which rolls the transaction back.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("{0}")]
    Db(String),

    #[error("transaction {0} aborted by deadlock detection")]
    TransactionAborted(TransactionId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such element: {0}")]
    NoSuchElement(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub fn is_abort(&self) -> bool {
        matches!(self, DbError::TransactionAborted(_))
    }
}
