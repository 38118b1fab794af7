// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Counters describing what a TopN operator did.

use std::fmt;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TopNStatus {
    pub pages_received: u64,
    pub pages_emitted: u64,
    pub rows_received: u64,
    pub rows_emitted: u64,
    /// Buffer bytes of the input pages, before any row is dropped.
    pub bytes_received: u64,
    /// Rows refused because they were not better than the worst retained row.
    pub rows_rejected: u64,
    /// Rows admitted and later pushed out by a better row.
    pub rows_evicted: u64,
    /// Rows never looked at because of sorted-input early termination.
    pub rows_skipped: u64,
    pub bytes_retained: u64,
    pub peak_bytes_retained: u64,
}

impl TopNStatus {
    pub(crate) fn set_retained(&mut self, bytes: u64) {
        self.bytes_retained = bytes;
        self.peak_bytes_retained = self.peak_bytes_retained.max(bytes);
    }
}

impl fmt::Display for TopNStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pages_in={} pages_out={} rows_in={} rows_out={} bytes_in={} rejected={} evicted={} \
             skipped={} retained_bytes={} peak_retained_bytes={}",
            self.pages_received,
            self.pages_emitted,
            self.rows_received,
            self.rows_emitted,
            self.bytes_received,
            self.rows_rejected,
            self.rows_evicted,
            self.rows_skipped,
            self.bytes_retained,
            self.peak_bytes_retained
        )
    }
}
