// RadioSweep: Parameter Sweeps and Result Consolidation for Emulated Radio Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Utility module collection of functions

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use itertools::Itertools;

const LOG_CONFIG: &str = "log4rs.yml";

/// Initialize logging from `log4rs.yml` in the working directory, or from `RUST_LOG` via
/// `pretty_env_logger` if there is no such file.
pub fn init_logging() {
    if Path::new(LOG_CONFIG).exists() {
        match log4rs::init_file(LOG_CONFIG, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Cannot use {LOG_CONFIG}: {e}"),
        }
    }
    pretty_env_logger::init();
}

/// Like `init_logging`, but routes the fallback logger through `multi` such that log lines do
/// not tear progress bars apart.
pub fn init_logging_with_progress(multi: &MultiProgress) {
    if Path::new(LOG_CONFIG).exists() && log4rs::init_file(LOG_CONFIG, Default::default()).is_ok()
    {
        return;
    }
    let logger = pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .build();
    let level = logger.filter();
    if LogWrapper::new(multi.clone(), logger).try_init().is_ok() {
        log::set_max_level(level);
    }
}

pub trait PathBufExt: Sized {
    fn then(self, p: impl AsRef<Path>) -> PathBuf;

    fn then_ts(self, p: impl AsRef<str>, ts: &str) -> PathBuf {
        self.then(p.as_ref().replacen("{}", ts, 1))
    }
}

impl PathBufExt for PathBuf {
    fn then(mut self, p: impl AsRef<Path>) -> PathBuf {
        self.push(p);
        self
    }
}

impl PathBufExt for &Path {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        let mut path = self.to_path_buf();
        path.push(p);
        path
    }
}

/// Compare two paths by their file names such that `node2` sorts before `node10`.
pub fn natural_cmp(a: &Path, b: &Path) -> Ordering {
    let name = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    human_sort::compare(&name(a), &name(b))
}

/// All files in `dir` matching the glob `pattern` (e.g., `*.db`), in natural order.
pub fn files_matching(dir: impl AsRef<Path>, pattern: &str) -> Result<Vec<PathBuf>, glob::PatternError> {
    let full_pattern = dir.as_ref().then(pattern).to_string_lossy().to_string();
    Ok(glob::glob(&full_pattern)?
        .filter_map(|entry| match entry {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Skipping unreadable path: {e}");
                None
            }
        })
        .sorted_by(|a, b| natural_cmp(a, b))
        .collect())
}
