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

//! §4.3.3: the opaque, content-agnostic `storedPath` used by the encrypted
//! providers to name a payload blob -- a 24-hex-char triplet `xx/yy/rest`
//! from 12 random bytes. Generated once per logical path on first write and
//! carried by the record afterwards, so it survives deletes and re-creates.

use rand::RngCore;

pub fn create_random_path() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}/{}/{}", &hex[0..8], &hex[8..16], &hex[16..24])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    #[test]
    fn produces_a_three_part_slash_joined_path() {
        let path = create_random_path();
        let parts: Vec<&str> = path.split('/').collect();
        assert_eq!(parts.len(), 3);
        for part in parts {
            assert_eq!(part.len(), 8);
            assert!(part.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn is_not_reused_between_calls() {
        assert_ne!(create_random_path(), create_random_path());
    }
}
