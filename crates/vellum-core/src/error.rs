use thiserror::Error;
use vellum_codec::CodecError;
use vellum_store::StoreError;
use vellum_types::TypeError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid identifier: {0}")]
    InvalidId(#[from] TypeError),
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_not_found())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Store(StoreError::Timeout))
    }

    /// HTTP status a routing layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Store(err) => err.http_status(),
            Self::InvalidId(_) => 400,
            Self::InvalidConfig(_) | Self::ConfigParse(_) | Self::Codec(_) => 500,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
