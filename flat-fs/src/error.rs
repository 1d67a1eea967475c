use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("no such file")]
    NotFound,
    #[error("file is held by another handle")]
    AlreadyInUse,
    #[error("file name is already taken")]
    AlreadyExists,
    #[error("no free inode left in the directory")]
    DirectoryFull,
    #[error("no free data block left")]
    AllocationExhausted,
    #[error("block map violation: {0}")]
    BlockMapViolation(MapError),
    #[error("handle does not belong to this file system")]
    InvalidHandle,
    #[error("handle was not opened for this kind of access")]
    WrongMode,
    #[error("unknown open mode")]
    InvalidMode,
    #[error("invalid file name")]
    InvalidName,
    #[error("file would exceed the maximum size")]
    FileTooLarge,
    #[error("files are still open")]
    Busy,
    #[error("volume geometry is not supported")]
    InvalidGeometry,
}

/// inode 拒绝登记块号的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("slot is already mapped")]
    AlreadyMapped,
    #[error("previous direct slot is unmapped")]
    OutOfOrder,
    #[error("index block is required")]
    NeedsIndex,
    #[error("index block cannot be attached")]
    IndexUnavailable,
    #[error("offset is beyond the index block")]
    OutOfRange,
}

impl From<MapError> for Error {
    fn from(err: MapError) -> Self {
        match err {
            MapError::OutOfRange => Self::FileTooLarge,
            err => Self::BlockMapViolation(err),
        }
    }
}
