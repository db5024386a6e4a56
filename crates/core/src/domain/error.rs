// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid backup state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Backup {id} is not restorable (status: {status})")]
    NotRestorable { id: String, status: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;
