//! Error types for quorate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("Raft storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // === Raft Errors ===
    #[error("Not leader: current leader is {0}")]
    NotLeader(String),

    #[error("Raft error: {0}")]
    Raft(String),

    #[error("Consensus timeout")]
    ConsensusTimeout,

    #[error("Proposal dropped before commit")]
    ProposalDropped,

    #[error("Membership unavailable: {0}")]
    Membership(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    // === Request Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConsensusTimeout | Error::ProposalDropped | Error::NotLeader(_)
        )
    }

    /// Leader hint carried by a `NotLeader` rejection
    pub fn leader_hint(&self) -> Option<&str> {
        match self {
            Error::NotLeader(leader) if !leader.is_empty() => Some(leader.as_str()),
            _ => None,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotLeader(_) => StatusCode::TEMPORARY_REDIRECT,
            Error::InvalidArgument(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::ConsensusTimeout => StatusCode::REQUEST_TIMEOUT,
            Error::ProposalDropped | Error::Membership(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<protobuf::ProtobufError> for Error {
    fn from(e: protobuf::ProtobufError) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<raft::Error> for Error {
    fn from(e: raft::Error) -> Self {
        Error::Raft(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
