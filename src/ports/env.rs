use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvError {
    #[error("Environment variable not found: {0}")]
    NotFound(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Read-only view of process configuration variables.
pub trait EnvironmentPort: Send + Sync {
    fn get_var(&self, key: &str) -> Result<String, EnvError>;

    /// `None` when unset; a parse failure is an `InvalidValue` error.
    fn parse_var<T>(&self, key: &str) -> Result<Option<T>, EnvError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
        Self: Sized,
    {
        match self.get_var(key) {
            Ok(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| EnvError::InvalidValue(key.to_string(), e.to_string())),
            Err(EnvError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
