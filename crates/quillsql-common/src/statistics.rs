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

//! Per-query statistics: non-fatal warnings plus whatever counters a
//! caller wants to thread through a single query's lifetime. The
//! process-wide registry (a bounded map keyed by query id, with old
//! entries evicted FIFO) lives in `quillsql-exec`, which owns query
//! lifecycle; this type is just the per-query payload it stores.

#[derive(Clone, Debug, Default)]
pub struct Statistics {
    pub messages: Vec<String>,
    pub rows_read: u64,
    pub bytes_read: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}
