use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Corrupt store format")]
    CorruptFormat,

    #[error("Incompatible format version: {major}.{minor}")]
    IncompatibleFormatVersion { major: u8, minor: u8 },

    #[error("Index out of bounds: {index} (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Level not found: {0}")]
    LevelNotFound(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Too many columns: capacity is {0}")]
    TooManyColumns(u32),

    #[error("Too many levels: level code range exhausted")]
    TooManyLevels,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
