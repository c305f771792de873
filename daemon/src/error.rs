use ::thiserror::Error;

/// Errors surfaced by the input manager and the RPC layer. Per-device I/O
/// failures close the affected device only; the manager itself survives them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad parameter")]
    BadParameter,
    #[error("device not found")]
    NotFound,
    #[error("not implemented")]
    NotImplemented,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("invalid device filter {0:?}")]
    InvalidFilter(String),
    #[error(transparent)]
    Io(#[from] ::std::io::Error),
}

impl From<::nix::errno::Errno> for Error {
    fn from(errno: ::nix::errno::Errno) -> Self {
        Error::Io(::std::io::Error::from(errno))
    }
}

impl From<Error> for ::tonic::Status {
    fn from(err: Error) -> Self {
        use ::tonic::Status;
        match err {
            Error::BadParameter => Status::invalid_argument("bad parameter"),
            Error::NotFound => Status::not_found("device not found"),
            Error::NotImplemented => Status::unimplemented("not implemented"),
            Error::DeadlineExceeded => Status::deadline_exceeded("deadline exceeded"),
            Error::InvalidFilter(filter) => {
                Status::invalid_argument(format!("invalid device filter {:?}", filter))
            }
            Error::Io(err) => Status::internal(err.to_string()),
        }
    }
}
