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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The canonical per-file entry inside every provider's index (§3).
///
/// `stored_path` and `tracking_value` are populated only by the providers
/// that need them (encrypted variants, and the plaintext filesystem
/// provider's rescan, respectively) and are otherwise left at their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub updated: DateTime<Utc>,
    pub last_synced: DateTime<Utc>,
    pub deleted: bool,
    pub stored_path: Option<String>,
    pub tracking_value: i64,
}

impl FileRecord {
    /// A brand new record for `path`, as created the first time a local
    /// edit is observed. `last_synced` starts at the zero value so the
    /// detector sees it as changed-since-last-sync.
    pub fn new(path: impl Into<String>, updated: DateTime<Utc>) -> Self {
        FileRecord {
            path: path.into(),
            updated,
            last_synced: DateTime::<Utc>::default(),
            deleted: false,
            stored_path: None,
            tracking_value: 0,
        }
    }
}

/// Splits a path into a conflict-copy path (§4.6.3): `foo.txt` becomes
/// `foo.conflict.txt`, `archive.tar.gz` becomes `archive.tar.conflict.gz`,
/// an extensionless `README` becomes `README.conflict`, and the empty
/// string is returned unchanged.
pub fn conflict_name(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let mut parts: Vec<&str> = path.split('.').collect();
    if parts.len() == 1 {
        return format!("{path}.conflict");
    }

    let last = parts.pop().expect("checked len > 1 above");
    parts.push("conflict");
    parts.push(last);
    parts.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    #[test]
    fn inserts_conflict_before_extension() {
        assert_eq!(conflict_name("foo.txt"), "foo.conflict.txt");
    }

    #[test]
    fn handles_multiple_extensions() {
        assert_eq!(conflict_name("archive.tar.gz"), "archive.tar.conflict.gz");
    }

    #[test]
    fn appends_when_no_extension() {
        assert_eq!(conflict_name("README"), "README.conflict");
    }

    #[test]
    fn leaves_empty_path_unchanged() {
        assert_eq!(conflict_name(""), "");
    }

    #[test]
    fn handles_leading_dotfile() {
        // A dotfile's leading dot counts as a split, matching the
        // original's naive `strings.Split(path, ".")` behavior.
        assert_eq!(conflict_name(".gitignore"), ".conflict.gitignore");
    }
}
