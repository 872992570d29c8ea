// Copyright 2024 The Buttercup Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Maximum number of repeated `-v` flags the CLI honors (§6).
pub const MAX_VERBOSITY: u8 = 5;

/// Maps a repeated `-v` count to a [`Level`], the way the original's
/// `logger` package maps a verbosity count to a log level. `0` is the
/// default (warnings and above); each additional `-v` reveals one more
/// tier down to full trace output.
pub fn level_for_verbosity(count: u8) -> Level {
    match count.min(MAX_VERBOSITY) {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Installs the global `tracing` subscriber. Only the `buttercup` binary
/// should call this -- library crates only ever emit `tracing` events, per
/// §9's "avoid ambient globals in library code".
pub fn init(verbosity: u8) {
    let level = level_for_verbosity(verbosity);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    #[test]
    fn verbosity_is_capped_at_five() {
        assert_eq!(level_for_verbosity(5), level_for_verbosity(20));
    }

    #[test]
    fn zero_verbosity_is_warn() {
        assert_eq!(level_for_verbosity(0), Level::WARN);
    }
}
