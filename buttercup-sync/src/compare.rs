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

//! The three-way change detector (§4.4): decides what to do with a record
//! given both sides' view of it, without ever reading payload bytes.
//! Mirrors `FileInfo.Compare` in `fileprovider/FileInfo.go`.

use buttercup_error::{make_err, Code, Error};
use buttercup_util::FileRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    /// Neither side has changed since the last sync. No action.
    UpToDate,
    /// Only the local side changed. Push wins.
    LocalNewer,
    /// Only the remote side changed. Pull wins.
    RemoteNewer,
    /// Both sides changed; local's `updated` is later. Keep local, pull the
    /// remote copy under a conflict name.
    ConflictLocalNewer,
    /// Both sides changed; remote's `updated` is later. Rename local out of
    /// the way, pull the remote copy in place.
    ConflictRemoteNewer,
}

/// Compares `fi` against `other`. `as_local` says which side `fi` is: when
/// `true`, `fi` is the local record and `other` is remote; when `false`,
/// `fi` is remote and `other` is local.
///
/// Returns `Code::CompareError` in the one state the original calls
/// "technically unreachable": both sides changed and ended up with the
/// exact same `updated` timestamp, so neither can be called newer.
pub fn compare(fi: &FileRecord, other: &FileRecord, as_local: bool) -> Result<Compare, Error> {
    let (changed_locally, changed_remotely, local, remote) = if as_local {
        (
            fi.last_synced < fi.updated,
            fi.last_synced < other.updated,
            fi,
            other,
        )
    } else {
        (
            other.last_synced < other.updated,
            other.last_synced < fi.updated,
            other,
            fi,
        )
    };

    if !changed_locally && !changed_remotely {
        return Ok(Compare::UpToDate);
    }
    if changed_locally && !changed_remotely {
        return Ok(Compare::LocalNewer);
    }
    if !changed_locally && changed_remotely {
        return Ok(Compare::RemoteNewer);
    }

    if remote.updated < local.updated {
        return Ok(Compare::ConflictLocalNewer);
    }
    if remote.updated > local.updated {
        return Ok(Compare::ConflictRemoteNewer);
    }

    Err(make_err!(
        Code::CompareError,
        "unknown state for {}: local.last_synced={}, local.updated={}, remote.updated={}",
        fi.path,
        local.last_synced,
        local.updated,
        remote.updated
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use pretty_assertions::assert_eq; // Must be declared in every module.

    fn record(updated: DateTime<Utc>, last_synced: DateTime<Utc>) -> FileRecord {
        let mut fi = FileRecord::new("foo.txt", updated);
        fi.last_synced = last_synced;
        fi
    }

    #[test]
    fn neither_changed_is_up_to_date() {
        let now = Utc::now();
        let local = record(now, now);
        let remote = record(now, now);
        assert_eq!(compare(&local, &remote, true).unwrap(), Compare::UpToDate);
    }

    #[test]
    fn only_local_changed_is_local_newer() {
        let now = Utc::now();
        let local = record(now, now - Duration::hours(1));
        let remote = record(now - Duration::hours(2), now - Duration::hours(2));
        assert_eq!(compare(&local, &remote, true).unwrap(), Compare::LocalNewer);
    }

    #[test]
    fn only_remote_changed_is_remote_newer() {
        let now = Utc::now();
        let local = record(now - Duration::hours(2), now - Duration::hours(2));
        let remote = record(now, now - Duration::hours(2));
        assert_eq!(compare(&local, &remote, true).unwrap(), Compare::RemoteNewer);
    }

    #[test]
    fn both_changed_local_more_recent_is_conflict_local_newer() {
        let now = Utc::now();
        let last_synced = now - Duration::hours(3);
        let local = record(now, last_synced);
        let remote = record(now - Duration::hours(1), last_synced);
        assert_eq!(compare(&local, &remote, true).unwrap(), Compare::ConflictLocalNewer);
    }

    #[test]
    fn both_changed_remote_more_recent_is_conflict_remote_newer() {
        let now = Utc::now();
        let last_synced = now - Duration::hours(3);
        let local = record(now - Duration::hours(1), last_synced);
        let remote = record(now, last_synced);
        assert_eq!(compare(&local, &remote, true).unwrap(), Compare::ConflictRemoteNewer);
    }

    #[test]
    fn both_changed_with_identical_timestamps_is_a_compare_error() {
        let now = Utc::now();
        let last_synced = now - Duration::hours(3);
        let local = record(now, last_synced);
        let remote = record(now, last_synced);
        let err = compare(&local, &remote, true).unwrap_err();
        assert_eq!(err.code, Code::CompareError);
    }

    #[test]
    fn as_local_false_swaps_which_side_is_which() {
        let now = Utc::now();
        // `fi` here is the remote record, `other` is local.
        let remote_fi = record(now, now - Duration::hours(2));
        let local_other = record(now - Duration::hours(3), now - Duration::hours(3));
        assert_eq!(compare(&remote_fi, &local_other, false).unwrap(), Compare::RemoteNewer);
    }
}
