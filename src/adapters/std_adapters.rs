use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::ports::{env::EnvError, Clock, EnvironmentPort};

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub struct StdEnvAdapter;

impl EnvironmentPort for StdEnvAdapter {
    fn get_var(&self, key: &str) -> Result<String, EnvError> {
        match std::env::var(key) {
            Ok(v) => Ok(v),
            Err(std::env::VarError::NotPresent) => Err(EnvError::NotFound(key.to_string())),
            Err(std::env::VarError::NotUnicode(_)) => Err(EnvError::InvalidValue(
                key.to_string(),
                "invalid UTF-8".to_string(),
            )),
        }
    }
}

/// In-memory environment, mostly for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

impl EnvironmentPort for MapEnv {
    fn get_var(&self, key: &str) -> Result<String, EnvError> {
        self.vars
            .get(key)
            .cloned()
            .ok_or_else(|| EnvError::NotFound(key.to_string()))
    }
}
