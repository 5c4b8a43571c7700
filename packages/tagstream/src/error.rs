use thiserror::Error;

use crate::registry::Handle;
use crate::types::Channel;

#[derive(Error, Debug)]
pub enum TagStreamError {
    #[error("Configuration impossible: {0}")]
    ConfigurationImpossible(String),

    #[error("Unknown handle: {0}")]
    UnknownHandle(Handle),

    #[error("Instance already registered under handle {0}")]
    AlreadyRegistered(Handle),

    #[error("Registry is full ({0} entries)")]
    RegistryFull(usize),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid channel: {0}")]
    InvalidChannel(Channel),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Time tagger has been shut down")]
    TaggerShutdown,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tag file error: {0}")]
    CsvError(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, TagStreamError>;
