use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Config, ConfigError};

#[async_trait]
pub trait ConfigBackend {
    async fn load(&mut self) -> Result<Config, ConfigError>;
}

pub trait ConfigExt {
    fn to_string(&self) -> Result<String, toml::ser::Error>;
}

impl ConfigExt for Config {
    fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.check()?;
        Ok(config)
    }
}

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
        }
    }
}

#[async_trait]
impl ConfigBackend for FileBackend {
    async fn load(&mut self) -> Result<Config, ConfigError> {
        let full = tokio::fs::read_to_string(&self.path).await?;
        full.parse()
    }
}
