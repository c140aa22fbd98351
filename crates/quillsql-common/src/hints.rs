// Copyright 2024 Quill Data Authors
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

//! Well-known scan hints and fuzzy-match validation of unrecognized
//! ones. Unknown hints are not an error — they are recorded on [`crate::statistics::Statistics::messages`]
//! with a suggested correction.

use bk_tree::{metrics, BKTree};

pub const NO_CACHE: &str = "NO_CACHE";
pub const NO_PARTITION: &str = "NO_PARTITION";
pub const NO_PUSH_PROJECTION: &str = "NO_PUSH_PROJECTION";
pub const NO_PUSH_SELECTION: &str = "NO_PUSH_SELECTION";
pub const PARALLEL_READ: &str = "PARALLEL_READ";

pub const WELL_KNOWN_HINTS: &[&str] = &[
    NO_CACHE,
    NO_PARTITION,
    NO_PUSH_PROJECTION,
    NO_PUSH_SELECTION,
    PARALLEL_READ,
];

/// Check `hint` (already uppercased by the caller) against the well-known
/// set. Returns `Ok(())` if recognized, or `Err(message)` with a
/// fuzzy-matched suggestion otherwise.
pub fn validate_hint(hint: &str) -> Result<(), String> {
    if WELL_KNOWN_HINTS.contains(&hint) {
        return Ok(());
    }
    let mut tree: BKTree<&str> = BKTree::new(metrics::Levenshtein);
    for known in WELL_KNOWN_HINTS {
        tree.add(known);
    }
    let suggestion = tree
        .find(hint, 3)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| *candidate);
    Err(match suggestion {
        Some(candidate) => format!("unknown hint '{hint}', did you mean '{candidate}'?"),
        None => format!("unknown hint '{hint}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_hints_pass() {
        for hint in WELL_KNOWN_HINTS {
            assert!(validate_hint(hint).is_ok());
        }
    }

    #[test]
    fn typo_suggests_nearest_hint() {
        let err = validate_hint("NO_CACH").unwrap_err();
        assert!(err.contains("NO_CACHE"), "got: {err}");
    }

    #[test]
    fn wildly_unknown_hint_has_no_suggestion() {
        let err = validate_hint("ZZZZZZZZZZ").unwrap_err();
        assert_eq!(err, "unknown hint 'ZZZZZZZZZZ'");
    }
}
