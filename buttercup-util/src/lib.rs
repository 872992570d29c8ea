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

//! Ambient plumbing shared by every crate in the workspace: the `FileRecord`
//! data model (§3), the conflict-path rule (§4.6.3), the stream codec's
//! channel primitive, and CLI logging setup.

pub mod blob_backend;
pub mod buf_channel;
pub mod file_record;
pub mod logging;
pub mod staging;

pub use blob_backend::BlobBackend;
pub use file_record::{conflict_name, FileRecord};
pub use staging::{restrict_to_owner, staging_path};
