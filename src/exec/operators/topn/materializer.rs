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
//! Sorted output page construction.
//!
//! Responsibilities:
//! - Walks the drained row references in sorted order, one output page per call.
//! - Bounds each page by payload bytes and row count.
//! - Charges page construction to the memory accountant; flushes a partial page
//!   when the budget runs out instead of dropping rows.

use std::collections::VecDeque;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::error::{ExecError, Result};
use crate::exec::operators::topn::payload::{PageBuilder, PayloadSlot, RowPayloadStore};
use crate::runtime::mem_tracker::{MemoryAccountant, Reservation};

/// Page sizing limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLimits {
    pub byte_size_hint: usize,
    pub max_rows: usize,
}

pub struct RowMaterializer {
    schema: SchemaRef,
    pending: VecDeque<PayloadSlot>,
    limits: PageLimits,
    accountant: Arc<dyn MemoryAccountant>,
}

impl RowMaterializer {
    /// `ordered` must be best-first, as produced by the queue drain.
    pub fn new(
        schema: SchemaRef,
        ordered: impl IntoIterator<Item = PayloadSlot>,
        limits: PageLimits,
        accountant: Arc<dyn MemoryAccountant>,
    ) -> Self {
        Self {
            schema,
            pending: ordered.into_iter().collect(),
            limits,
            accountant,
        }
    }

    pub fn remaining_rows(&self) -> usize {
        self.pending.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    /// Build the next output page, taking its rows out of `store`.
    ///
    /// Returns `Ok(None)` once every row has been emitted.
    pub fn next_page(&mut self, store: &mut RowPayloadStore) -> Result<Option<Chunk>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let max_rows = self.limits.max_rows.max(1);
        let mut page = PageBuilder::new(self.schema.clone(), self.pending.len().min(max_rows));
        let mut reservation = Reservation::empty(Arc::clone(&self.accountant));

        while let Some(&slot) = self.pending.front() {
            if page.rows() >= max_rows || page.payload_bytes() >= self.limits.byte_size_hint {
                break;
            }
            let len = store.payload_len(slot).ok_or_else(|| missing(slot))?;
            let payload = match reservation.try_grow(len) {
                Ok(()) => store.remove(slot).ok_or_else(|| missing(slot))?,
                Err(_) if page.rows() > 0 => break,
                Err(_) => {
                    // The row's own reservation goes away with it; retry once
                    // the retained bytes have been handed back.
                    let payload = store.remove(slot).ok_or_else(|| missing(slot))?;
                    reservation.try_grow(len)?;
                    payload
                }
            };
            self.pending.pop_front();
            page.append_row(&payload)?;
        }

        let chunk = page.finish()?;
        drop(reservation);
        Ok(Some(chunk))
    }

    /// Forget every pending row. Their payloads stay with the store.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn missing(slot: PayloadSlot) -> ExecError {
    ExecError::Internal(format!("row payload {slot:?} missing from store"))
}
