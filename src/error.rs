//! Error taxonomy crossing the guest/host boundary.
//!
//! Every fallible host operation returns [`WasiErrorCode`]. The taxonomy is
//! the contract: host operations never collapse a specific failure into a
//! generic "error" variant, and no panic or exception from host code is ever
//! allowed to unwind into the guest (see `SPEC_FULL.md` §7).

use std::io;

/// The closed set of error kinds a guest import may observe.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum WasiErrorCode {
    #[error("no such entry")]
    NoEntry,
    #[error("entry already exists")]
    Exist,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("invalid argument")]
    Invalid,
    #[error("symlink loop")]
    Loop,
    #[error("resource busy")]
    Busy,
    #[error("access denied")]
    Access,
    #[error("permission denied")]
    Permission,
    #[error("i/o error")]
    Io,
    #[error("would block")]
    WouldBlock,
    #[error("not supported")]
    NotSupported,
    #[error("overflow")]
    Overflow,
    #[error("name too long")]
    NameTooLong,
}

/// Result alias used throughout the bridge for guest-reachable operations.
pub type WasiResult<T> = Result<T, WasiErrorCode>;

impl From<io::Error> for WasiErrorCode {
    /// Maps a lower-level I/O failure onto the taxonomy. This is the single
    /// place (B) and (C) failures are translated for the guest; anything
    /// that does not fit a more specific kind degrades to `Io`.
    fn from(err: io::Error) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            NotFound => WasiErrorCode::NoEntry,
            AlreadyExists => WasiErrorCode::Exist,
            NotADirectory => WasiErrorCode::NotDirectory,
            IsADirectory => WasiErrorCode::IsDirectory,
            DirectoryNotEmpty => WasiErrorCode::NotEmpty,
            InvalidInput | InvalidData => WasiErrorCode::Invalid,
            ResourceBusy | ExecutableFileBusy => WasiErrorCode::Busy,
            PermissionDenied => WasiErrorCode::Permission,
            WouldBlock | TimedOut => WasiErrorCode::WouldBlock,
            Unsupported => WasiErrorCode::NotSupported,
            FileTooLarge | StorageFull | QuotaExceeded => WasiErrorCode::Overflow,
            InvalidFilename | ArgumentListTooLong => WasiErrorCode::NameTooLong,
            _ => WasiErrorCode::Io,
        }
    }
}
