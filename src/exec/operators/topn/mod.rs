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
//! TopN operator family.
//!
//! Responsibilities:
//! - `bounded_queue`: keeps the K best composite keys.
//! - `payload`: row payload serialization and the retained-row store.
//! - `materializer`: rebuilds sorted output pages from stored payloads.
//! - `topn_processor`: the operator state machine and its factory.
//! - `status`: execution counters.

pub mod bounded_queue;
pub mod materializer;
pub mod payload;
pub mod status;
pub mod topn_processor;

pub use bounded_queue::{BoundedRowQueue, Offer};
pub use materializer::{PageLimits, RowMaterializer};
pub use payload::{PageBuilder, PayloadSlot, PayloadWriter, RowPayloadStore};
pub use status::TopNStatus;
pub use topn_processor::{
    DEFAULT_EMIT_PAGE_BYTE_SIZE_HINT, DEFAULT_MAX_PAGE_ROWS, InputOrdering, SortColumn,
    TopNConfig, TopNOperator, TopNProcessorFactory, TopNState,
};
