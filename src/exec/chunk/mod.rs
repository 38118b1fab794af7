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
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::buffer::Buffer;
use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::exec::error::{ExecError, Result};

/// A page of data: same-length column blocks addressed by channel index.
/// Wrapper around Arrow RecordBatch.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn try_new(schema: SchemaRef, columns: Vec<ArrayRef>) -> Result<Self> {
        Ok(Self {
            batch: RecordBatch::try_new(schema, columns)?,
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn column(&self, channel: usize) -> Result<&ArrayRef> {
        self.batch.columns().get(channel).ok_or_else(|| {
            ExecError::InvalidInput(format!(
                "channel {} out of range (num_columns={})",
                channel,
                self.batch.num_columns()
            ))
        })
    }

    /// Whether the block at `channel` is hinted to keep every multi-value
    /// cell sorted ascending.
    pub fn is_mv_sorted_ascending(&self, channel: usize) -> bool {
        self.batch
            .schema()
            .fields()
            .get(channel)
            .is_some_and(|f| field_mv_sorted_ascending(f.as_ref()))
    }

    /// Bytes of the distinct buffers backing this page.
    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
        }
    }
}

pub const FIELD_META_MV_SORTED_ASCENDING: &str = "topn.mv_sorted_ascending";

/// Mark a list field as holding ascending-sorted multi-value cells.
pub fn field_with_mv_sorted_ascending(field: Field) -> Field {
    let mut meta = field.metadata().clone();
    meta.insert(FIELD_META_MV_SORTED_ASCENDING.to_string(), "true".to_string());
    field.with_metadata(meta)
}

pub fn field_mv_sorted_ascending(field: &Field) -> bool {
    field
        .metadata()
        .get(FIELD_META_MV_SORTED_ASCENDING)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Estimate RecordBatch size by summing unique buffers inside the batch.
///
/// Buffers are de-duplicated only within a single RecordBatch; buffers shared
/// across batches (e.g. slices) are counted once per batch.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, ListArray};
    use arrow::datatypes::{DataType, Int32Type};

    #[test]
    fn mv_sorted_hint_is_read_from_field_metadata() {
        let item = Arc::new(Field::new("item", DataType::Int32, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            field_with_mv_sorted_ascending(Field::new("b", DataType::List(item), true)),
        ]));
        let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1), Some(2)]),
            None,
        ]);
        let chunk = Chunk::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef,
                Arc::new(list) as ArrayRef,
            ],
        )
        .expect("chunk");
        assert!(!chunk.is_mv_sorted_ascending(0));
        assert!(chunk.is_mv_sorted_ascending(1));
        assert!(!chunk.is_mv_sorted_ascending(7));
    }

    #[test]
    fn column_out_of_range_is_invalid_input() {
        let chunk = Chunk::default();
        let err = chunk.column(0).expect_err("no columns");
        assert!(matches!(err, ExecError::InvalidInput(_)), "err={err}");
    }

    #[test]
    fn logical_bytes_covers_column_buffers() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]));
        let col: ArrayRef = Arc::new(Int32Array::from((0..1024).collect::<Vec<_>>()));
        let chunk = Chunk::try_new(schema, vec![col]).expect("chunk");
        assert!(chunk.logical_bytes() >= 4096);
        assert_eq!(Chunk::default().logical_bytes(), 0);
    }
}
