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
//! Composite binary key construction.
//!
//! Layout per row: for each ORDER BY column an indicator byte plus the
//! encoded value (payload inverted for descending columns), then an 8-byte
//! big-endian arrival sequence number. Unsigned byte comparison of two keys is
//! the full multi-column order with first-seen-first tie breaking.

use crate::exec::chunk::Chunk;
use crate::exec::error::Result;
use crate::exec::sortkey::encoder::{EncoderKind, NullMarkers, invert};
use crate::exec::sortkey::extractor::KeyExtractor;

/// Width of the arrival sequence suffix.
pub const TIE_BREAK_WIDTH: usize = std::mem::size_of::<u64>();

/// One ORDER BY entry bound to an input channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortKeySpec {
    pub channel: usize,
    pub ascending: bool,
    pub nulls_first: bool,
    pub encoder: EncoderKind,
}

impl SortKeySpec {
    pub fn markers(&self) -> NullMarkers {
        NullMarkers::for_nulls_first(self.nulls_first)
    }
}

/// Builds composite keys for pages with a fixed sort spec.
#[derive(Clone, Debug)]
pub struct RowKeyBuilder {
    columns: Vec<SortKeySpec>,
}

impl RowKeyBuilder {
    pub fn new(columns: Vec<SortKeySpec>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[SortKeySpec] {
        &self.columns
    }

    /// Select one extractor per sort column for `chunk`.
    pub fn bind<'a>(&'a self, chunk: &'a Chunk) -> Result<BoundRowKeys<'a>> {
        let mut extractors = Vec::with_capacity(self.columns.len());
        for spec in &self.columns {
            let array = chunk.column(spec.channel)?;
            let extractor = KeyExtractor::select(
                array,
                spec.encoder,
                spec.ascending,
                spec.markers(),
                chunk.is_mv_sorted_ascending(spec.channel),
            )?;
            extractors.push((extractor, !spec.ascending));
        }
        Ok(BoundRowKeys { extractors })
    }
}

/// Extractors selected for one page.
pub struct BoundRowKeys<'a> {
    extractors: Vec<(KeyExtractor<'a>, bool)>,
}

impl BoundRowKeys<'_> {
    /// Write the composite key of `row` into `out` (cleared first).
    ///
    /// Returns the byte length of the leading sort column's contribution.
    #[inline]
    pub fn build_key(&self, row: usize, seq: u64, out: &mut Vec<u8>) -> usize {
        out.clear();
        let mut leading_len = 0;
        for (idx, (extractor, descending)) in self.extractors.iter().enumerate() {
            let start = out.len();
            let non_null = extractor.write(row, out);
            if *descending && non_null {
                invert(&mut out[start + 1..]);
            }
            if idx == 0 {
                leading_len = out.len();
            }
        }
        out.extend_from_slice(&seq.to_be_bytes());
        leading_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn spec(channel: usize, ascending: bool, nulls_first: bool, encoder: EncoderKind) -> SortKeySpec {
        SortKeySpec {
            channel,
            ascending,
            nulls_first,
            encoder,
        }
    }

    fn two_column_chunk(c1: Vec<&str>, c2: Vec<Option<&str>>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![
            Field::new("c1", DataType::Utf8, false),
            Field::new("c2", DataType::Utf8, true),
        ]));
        Chunk::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(c1)) as ArrayRef,
                Arc::new(StringArray::from(c2)) as ArrayRef,
            ],
        )
        .expect("chunk")
    }

    fn keys(builder: &RowKeyBuilder, chunk: &Chunk) -> Vec<Vec<u8>> {
        let bound = builder.bind(chunk).expect("bind");
        let mut out = Vec::new();
        (0..chunk.len())
            .map(|row| {
                bound.build_key(row, row as u64, &mut out);
                out.clone()
            })
            .collect()
    }

    #[test]
    fn second_column_only_orders_within_first_column_ties() {
        let chunk = two_column_chunk(
            vec!["b", "a", "a", "b", "a"],
            vec![Some("x"), Some("y"), Some("z"), Some("y"), Some("x")],
        );
        let builder = RowKeyBuilder::new(vec![
            spec(0, true, true, EncoderKind::Utf8Sortable),
            spec(1, false, true, EncoderKind::Utf8Sortable),
        ]);
        let keys = keys(&builder, &chunk);
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by(|a, b| keys[*a].cmp(&keys[*b]));
        // (a,z) (a,y) (a,x) (b,y) (b,x)
        assert_eq!(order, vec![2, 1, 4, 3, 0]);
    }

    #[test]
    fn descending_nulls_keep_configured_placement() {
        let chunk = two_column_chunk(vec!["a", "a", "a"], vec![Some("m"), None, Some("z")]);
        let nulls_first = RowKeyBuilder::new(vec![spec(1, false, true, EncoderKind::Utf8Sortable)]);
        let nulls_last = RowKeyBuilder::new(vec![spec(1, false, false, EncoderKind::Utf8Sortable)]);

        let k = keys(&nulls_first, &chunk);
        assert!(k[1] < k[2] && k[2] < k[0]);
        let k = keys(&nulls_last, &chunk);
        assert!(k[2] < k[0] && k[0] < k[1]);
    }

    #[test]
    fn equal_values_tie_break_by_sequence() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let chunk = Chunk::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![10, 10])) as ArrayRef],
        )
        .expect("chunk");
        let builder = RowKeyBuilder::new(vec![spec(0, true, true, EncoderKind::SortableDefault)]);
        let bound = builder.bind(&chunk).expect("bind");
        let mut first = Vec::new();
        let mut second = Vec::new();
        let leading = bound.build_key(0, 7, &mut first);
        bound.build_key(1, 8, &mut second);
        assert_eq!(leading, 1 + 8);
        assert_eq!(first.len(), leading + TIE_BREAK_WIDTH);
        assert_eq!(first[..leading], second[..leading]);
        assert!(first < second);
    }

    #[test]
    fn missing_channel_fails_bind() {
        let chunk = two_column_chunk(vec!["a"], vec![None]);
        let builder = RowKeyBuilder::new(vec![spec(5, true, true, EncoderKind::Utf8Sortable)]);
        assert!(builder.bind(&chunk).is_err());
    }
}
