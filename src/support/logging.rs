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

//! Logging setup.
//!
//! The rest of the crate only uses the `log` facade. Embedding servers that
//! already install a logger need not call anything here.

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::support::error::Error;
use crate::support::system_config::LoggingConfig;

const PATTERN: &str = "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}";

/// Install the global logger described by `config`.
///
/// If a log4rs configuration file is given, it is used verbatim. Otherwise,
/// everything at or above the configured level goes to stderr.
pub fn init(config: &LoggingConfig) -> Result<(), Error> {
    if let Some(ref file) = config.config_file {
        log4rs::init_file(file, log4rs::file::Deserializers::default())
            .map_err(|e| {
                Error::Configuration(format!(
                    "failed to load {}: {}",
                    file.display(),
                    e
                ))
            })
    } else {
        init_console(config.level_filter()?)
    }
}

/// Install a logger which writes everything at `level` or above to stderr.
pub fn init_console(level: LevelFilter) -> Result<(), Error> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| Error::Configuration(e.to_string()))?;

    log4rs::init_config(config)
        .map(|_| ())
        .map_err(|e| Error::Configuration(e.to_string()))
}
