use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompatError {
    #[error("buffer overflow: need {needed} bytes, {available} available")]
    Overflow { needed: usize, available: usize },

    #[error("buffer underflow: need {needed} bytes, {available} remaining")]
    Underflow { needed: usize, available: usize },

    #[error("view out of bounds: offset {offset} + len {len} exceeds region of {region} bytes")]
    ViewOutOfBounds {
        offset: usize,
        len: usize,
        region: usize,
    },

    #[error("unknown text encoding: {0}")]
    UnknownEncoding(String),

    #[error("buffer is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid {encoding} input")]
    InvalidEncodedInput { encoding: &'static str },
}
