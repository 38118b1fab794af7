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
//! Byte-comparable sort keys.
//!
//! Responsibilities:
//! - `encoder`: value-level encodings whose byte order is the value order.
//! - `extractor`: per-column representative value selection (nulls, multi-value cells).
//! - `row_key`: composite keys over all ORDER BY columns plus a tie-break suffix.

pub mod encoder;
pub mod extractor;
pub mod row_key;

pub use encoder::{EncoderKind, NullMarkers, SortableNative};
pub use extractor::{KeyExtractor, MultiValuePick};
pub use row_key::{BoundRowKeys, RowKeyBuilder, SortKeySpec, TIE_BREAK_WIDTH};
