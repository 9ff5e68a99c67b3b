// Copyright 2025 cellar Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use twox_hash::XxHash64;

/// Hash a serialized key with the default hasher.
///
/// The cache itself never hashes: every facade operation takes a precomputed
/// hash so callers control the hash function. This helper is the default for
/// callers without an opinion; all that matters is that the same function is
/// used for every operation on one cache.
pub fn hash_key(key: &[u8]) -> u64 {
    XxHash64::oneshot(0, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_is_stable() {
        assert_eq!(hash_key(b"alpha"), hash_key(b"alpha"));
        assert_ne!(hash_key(b"alpha"), hash_key(b"beta"));
    }
}
