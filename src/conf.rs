use std::path::PathBuf;
use std::time::Duration;

use twelf::reexports::serde::{Deserialize, Serialize};
use twelf::{config, Layer};

use crate::error::Error;

pub const DEFAULT_URL: &str = "http://localhost:9200";
pub const DEFAULT_SIZE: u64 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const ENV_PREFIX: &str = "ESF_";

#[config]
#[derive(Debug, Default)]
pub struct Config {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    root_certificates: Option<PathBuf>,
    insecure: Option<bool>,
    index: Option<String>,
    size: Option<u64>,
    timeout_secs: Option<u64>,
    retries: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Endpoint {
    url: String,
    #[serde(default)]
    basic_auth: Option<BasicAuth>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BasicAuth {
    username: String,
    #[serde(default)]
    password: Option<String>,
}

/// Loads the optional TOML file first, environment variables win over it.
pub fn load(path: Option<&PathBuf>) -> crate::error::Result<Config> {
    let mut layers = Vec::new();
    if let Some(path) = path {
        if !path.is_file() {
            return Err(Error::Config(format!("config file {:?} not found", path)));
        }
        layers.push(Layer::Toml(path.clone()));
    }
    layers.push(Layer::Env(Some(ENV_PREFIX.to_string())));

    Config::with_layers(&layers).map_err(|e| Error::Config(e.to_string()))
}

impl Config {
    pub fn get_url(&self) -> &str {
        self.url.as_deref().unwrap_or(DEFAULT_URL)
    }
    pub fn get_root_certificates(&self) -> Option<&PathBuf> {
        self.root_certificates.as_ref()
    }
    pub fn is_insecure(&self) -> bool {
        self.insecure.unwrap_or(false)
    }
    pub fn get_index(&self) -> Option<&str> {
        self.index.as_deref()
    }
    pub fn get_size(&self) -> u64 {
        self.size.unwrap_or(DEFAULT_SIZE)
    }
    pub fn get_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
    pub fn get_retries(&self) -> usize {
        self.retries.unwrap_or(0)
    }

    pub fn set_url(&mut self, url: String) {
        self.url = Some(url);
    }

    pub fn endpoint(&self) -> Endpoint {
        let basic_auth = self.username.as_ref().map(|username| BasicAuth {
            username: username.clone(),
            password: self.password.clone(),
        });
        Endpoint {
            url: self.get_url().trim_end_matches('/').to_string(),
            basic_auth,
        }
    }
}

impl BasicAuth {
    pub fn get_username(&self) -> &String {
        &self.username
    }
    pub fn get_password(&self) -> &Option<String> {
        &self.password
    }
}

impl Endpoint {
    #[cfg(test)]
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            basic_auth: None,
        }
    }
    #[cfg(test)]
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.basic_auth = Some(BasicAuth {
            username: username.to_string(),
            password: Some(password.to_string()),
        });
        self
    }
    pub fn get_url(&self) -> &String {
        &self.url
    }
    pub fn has_basic_auth(&self) -> bool {
        matches!(&self.basic_auth, Some(auth) if auth.get_password().is_some())
    }
    pub fn get_username(&self) -> String {
        if let Some(basic_auth) = &self.basic_auth {
            basic_auth.get_username().clone()
        } else {
            String::default()
        }
    }
    pub fn get_password(&self) -> Option<String> {
        if let Some(basic_auth) = &self.basic_auth {
            return basic_auth.get_password().clone();
        }
        None
    }
}
