use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
