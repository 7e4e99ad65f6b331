use thiserror::Error;

/// Error taxonomy for the appliance, matching the four non-hardware-transient
/// kinds named in the error handling design: configuration, network,
/// authorization, and unexpected/protocol state. Hardware-transient errors
/// never reach this type -- the hardware facade swallows them at the source
/// and returns a safe default (see `hardware::HardwareFacade`).
#[derive(Debug, Error)]
pub enum PortalBoxError {
    #[error("configuration missing or invalid: {0}")]
    ConfigAbsent(String),

    #[error("network request failed: {0}")]
    NetworkTransient(String),

    #[error("server response could not be decoded: {0}")]
    DecodeError(String),

    #[error("unexpected FSM input: {0}")]
    UnexpectedState(String),
}

pub type Result<T> = std::result::Result<T, PortalBoxError>;
