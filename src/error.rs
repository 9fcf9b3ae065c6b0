use thiserror::Error;

use crate::deriv::DerivFlags;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("unknown activation function code `{0}`")]
    UnknownActivation(String),
    #[error("parameter index {index} out of range (nparams = {nparams})")]
    ParameterIndex { index: usize, nparams: usize },
    #[error("derivative substrate not allocated: {0}")]
    MissingSubstrate(DerivFlags),
    #[error("parameter {index} is not tracked by the variational substrate")]
    UntrackedParameter { index: usize },
    #[error("network is not connected")]
    NotConnected,
    #[error("i/o error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;
