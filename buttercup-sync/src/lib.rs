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

//! The change detector (§4.4), the source adapter (§4.5), and the
//! synchronizer (§4.6) that ties a pair of providers together into
//! `pull`/`push`/`sync`.

mod compare;
mod source;
mod synchronizer;

pub use compare::{compare, Compare};
pub use source::Source;
pub use synchronizer::Synchronizer;
