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

//! §9 "Staged plaintext": the decrypted index sits in the clear under the
//! OS temp dir for the span of one `load`/`close` cycle. Two things keep
//! that window from being a readable-by-anyone surface: an unpredictable
//! name (16 random bytes, hex) and owner-only permissions, set before
//! anything is written to the file.

use std::path::{Path, PathBuf};

use buttercup_error::{Error, ResultExt};
use rand::RngCore;

/// Builds an unguessable staging path under `dir`, named
/// `<prefix>-<32 hex chars>.<extension>` from 16 random bytes.
pub fn staging_path(dir: &Path, prefix: &str, extension: &str) -> PathBuf {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    dir.join(format!("{prefix}-{hex}.{extension}"))
}

/// Restricts `path` to owner read/write only. No-op on non-unix targets,
/// where there is no equivalent the original relies on.
pub fn restrict_to_owner(path: &Path) -> Result<(), Error> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(Error::from)
            .err_tip(|| format!("could not restrict permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    #[test]
    fn staging_path_name_has_32_hex_chars_from_16_random_bytes() {
        let path = staging_path(Path::new("/tmp"), "buttercup-index", "db");
        let name = path.file_name().unwrap().to_str().unwrap();
        let hex_part = name
            .strip_prefix("buttercup-index-")
            .and_then(|s| s.strip_suffix(".db"))
            .unwrap();
        assert_eq!(hex_part.len(), 32);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn staging_path_is_not_reused_between_calls() {
        let a = staging_path(Path::new("/tmp"), "p", "db");
        let b = staging_path(Path::new("/tmp"), "p", "db");
        assert_ne!(a, b);
    }

    #[cfg(unix)]
    #[test]
    fn restrict_to_owner_sets_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged.db");
        std::fs::write(&path, b"plaintext").unwrap();
        restrict_to_owner(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
