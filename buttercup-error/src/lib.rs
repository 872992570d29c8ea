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

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

/// Error taxonomy shared by every crate in the workspace.
///
/// This mirrors the sync engine's error classes: `NotFound` and `Locked`
/// are often benign and handled explicitly by callers, the rest are
/// reported and (depending on where they occur) abort the operation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// A record or backend object was absent. Often benign, e.g. deleting
    /// a file that doesn't exist is a no-op.
    NotFound,
    /// A lock could not be acquired, or `Unlock` was attempted by a
    /// non-owning client.
    Locked,
    /// Wrong passphrase, corrupt ciphertext, or a truncated stream.
    CodecError,
    /// The relational index store failed (schema, IO, query).
    IndexError,
    /// The filesystem or object-store backend failed.
    BackendError,
    /// Both sides changed and ended up with an identical `updated`
    /// timestamp -- the two edits are indistinguishable.
    CompareError,
    /// Configuration was missing or invalid.
    ConfigError,
    /// Caller passed a bad argument.
    InvalidArgument,
    /// Unclassified failure.
    Internal,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An error with a `Code` and a chain of human readable context, built up
/// as it propagates with [`ResultExt::err_tip`].
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    pub code: Code,
    pub messages: Vec<String>,
}

impl Error {
    pub fn new(code: Code, message: String) -> Self {
        Error {
            code,
            messages: vec![message],
        }
    }

    /// Appends another line of context, innermost-first.
    #[must_use]
    pub fn append(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Combines two errors that occurred concurrently (e.g. a transfer
    /// failure and a cleanup failure) into one, keeping both message
    /// chains. The first error's code wins.
    #[must_use]
    pub fn merge(self, other: impl Into<Self>) -> Self {
        let other = other.into();
        let mut messages = self.messages;
        messages.extend(other.messages);
        Error {
            code: self.code,
            messages,
        }
    }

    pub fn to_std_err(&self) -> io::Error {
        io::Error::other(self.to_string())
    }
}

impl<T> From<Result<T, Error>> for Error {
    fn from(value: Result<T, Error>) -> Self {
        match value {
            Ok(_) => unreachable!("From<Result<T, Error>> for Error called on an Ok value"),
            Err(e) => e,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.messages.join(" -> "))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.messages.join(" -> "))
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::NotFound => Code::NotFound,
            _ => Code::BackendError,
        };
        Error::new(code, err.to_string())
    }
}

/// Constructs an [`Error`] with a formatted message, in the style of
/// `anyhow!`/`format!`.
#[macro_export]
macro_rules! make_err {
    ($code:expr, $($arg:tt)+) => {
        $crate::Error::new($code, format!($($arg)+))
    };
}

/// Like [`make_err!`] but always tagged [`Code::InvalidArgument`]. Used at
/// system boundaries (config parsing, CLI argument handling) when the
/// caller supplied something nonsensical.
#[macro_export]
macro_rules! make_input_err {
    ($($arg:tt)+) => {
        $crate::Error::new($crate::Code::InvalidArgument, format!($($arg)+))
    };
}

/// Extension trait used to attach context to a `Result<T, Error>` as it
/// propagates up the call stack, without losing the original error.
pub trait ResultExt<T> {
    fn err_tip<F, M>(self, tip_fn: F) -> Result<T, Error>
    where
        F: FnOnce() -> M,
        M: Into<String>;

    /// Like [`Self::err_tip`] but also overrides the error's code.
    fn err_tip_with_code<F, M>(self, tip_fn: F) -> Result<T, Error>
    where
        F: FnOnce(&Error) -> (Code, M),
        M: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    fn err_tip<F, M>(self, tip_fn: F) -> Result<T, Error>
    where
        F: FnOnce() -> M,
        M: Into<String>,
    {
        self.map_err(|e| e.into().append(tip_fn().into()))
    }

    fn err_tip_with_code<F, M>(self, tip_fn: F) -> Result<T, Error>
    where
        F: FnOnce(&Error) -> (Code, M),
        M: Into<String>,
    {
        self.map_err(|e| {
            let e = e.into();
            let (code, message) = tip_fn(&e);
            Error {
                code,
                messages: e.messages,
            }
            .append(message.into())
        })
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn err_tip<F, M>(self, tip_fn: F) -> Result<T, Error>
    where
        F: FnOnce() -> M,
        M: Into<String>,
    {
        self.ok_or_else(|| Error::new(Code::NotFound, tip_fn().into()))
    }

    fn err_tip_with_code<F, M>(self, tip_fn: F) -> Result<T, Error>
    where
        F: FnOnce(&Error) -> (Code, M),
        M: Into<String>,
    {
        match self {
            Some(v) => Ok(v),
            None => {
                let placeholder = Error::new(Code::NotFound, String::new());
                let (code, message) = tip_fn(&placeholder);
                Err(Error::new(code, message.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    #[test]
    fn err_tip_chains_messages_innermost_first() {
        let result: Result<(), Error> = Err(make_err!(Code::NotFound, "file missing"));
        let result = result.err_tip(|| "while retrieving foo.txt");
        let err = result.unwrap_err();
        assert_eq!(err.code, Code::NotFound);
        assert_eq!(err.messages, vec!["file missing", "while retrieving foo.txt"]);
    }

    #[test]
    fn merge_keeps_both_message_chains_and_first_code() {
        let a = make_err!(Code::BackendError, "upload failed");
        let b = make_err!(Code::IndexError, "index write failed");
        let merged = a.merge(b);
        assert_eq!(merged.code, Code::BackendError);
        assert_eq!(merged.messages, vec!["upload failed", "index write failed"]);
    }

    #[test]
    fn option_err_tip_produces_not_found() {
        let value: Option<i32> = None;
        let result = value.err_tip(|| "missing record");
        assert_eq!(result.unwrap_err().code, Code::NotFound);
    }
}
