//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailcore.
//
// Mailcore is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcore is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailcore. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// The configuration of the mailbox core.
///
/// This is normally stored in a TOML file named `mailcore.toml` alongside the
/// rest of the server configuration. Every section is optional.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct CoreConfig {
    /// Options relating to mailbox naming.
    #[serde(default)]
    pub mailbox: MailboxConfig,

    /// Configuration of event dispatch.
    ///
    /// The defaults are reasonable for most installations.
    #[serde(default)]
    pub events: EventsConfig,

    /// Configuration of the path-keyed mailbox cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Configuration of diagnostic logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// The hierarchy delimiter within mailbox names.
    pub delimiter: char,

    /// The namespace in which personal mailboxes are created.
    pub default_namespace: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        MailboxConfig {
            delimiter: '.',
            default_namespace: "#private".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// The number of worker threads which run asynchronous listeners.
    ///
    /// Defaults to the number of CPUs.
    pub async_workers: usize,

    /// The maximum number of asynchronous deliveries which may be queued
    /// before dispatch starts running them on the mutating thread.
    pub async_queue_size: usize,

    /// How many recent deliveries of `ONCE` listeners are remembered to
    /// suppress duplicates.
    pub once_ledger_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            async_workers: num_cpus::get(),
            async_queue_size: 256,
            once_ledger_size: 4096,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether path lookups are cached at all.
    pub enabled: bool,

    /// The maximum number of mailboxes held by the cache.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            max_entries: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The level at which the built-in console logger writes.
    ///
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,

    /// If set, the path to a log4rs TOML configuration file, which then
    /// replaces the built-in console logger entirely.
    pub config_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_owned(),
            config_file: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<log::LevelFilter, Error> {
        self.level.parse::<log::LevelFilter>().map_err(|_| {
            Error::Configuration(format!("unknown log level {:?}", self.level))
        })
    }
}

impl CoreConfig {
    /// Load and validate the configuration stored at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        let config: CoreConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check for contradictory or unusable settings.
    pub fn validate(&self) -> Result<(), Error> {
        let delim = self.mailbox.delimiter;
        if delim.is_alphanumeric()
            || delim.is_whitespace()
            || '%' == delim
            || '*' == delim
        {
            return Err(Error::Configuration(format!(
                "{:?} cannot be used as the hierarchy delimiter",
                delim
            )));
        }

        if self.mailbox.default_namespace.is_empty() {
            return Err(Error::Configuration(
                "default_namespace must not be empty".to_owned(),
            ));
        }

        if 0 == self.events.async_workers {
            return Err(Error::Configuration(
                "at least one async worker is required".to_owned(),
            ));
        }

        if 0 == self.events.async_queue_size {
            return Err(Error::Configuration(
                "async_queue_size must be positive".to_owned(),
            ));
        }

        if self.cache.enabled && 0 == self.cache.max_entries {
            return Err(Error::Configuration(
                "cache is enabled but max_entries is 0".to_owned(),
            ));
        }

        self.logging.level_filter()?;
        if self.logging.config_file.is_some()
            && self.logging.level != LoggingConfig::default().level
        {
            return Err(Error::Configuration(
                "logging.level and logging.config_file are mutually exclusive"
                    .to_owned(),
            ));
        }

        Ok(())
    }
}
