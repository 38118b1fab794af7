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
//! Per-column sort key extraction.
//!
//! Responsibilities:
//! - Resolve one representative value per row: scalar, null, or the min/max
//!   of a multi-value cell depending on sort direction.
//! - Write the null indicator byte followed by the encoded value.
//!
//! The block shape (dense vector, nullable vector, sorted multi-value,
//! unordered multi-value) is decided once per page in `KeyExtractor::select`;
//! the per-row path only matches on that decision.

use std::cmp::Ordering;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, GenericBinaryArray, GenericStringArray,
    OffsetSizeTrait, PrimitiveArray,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type,
    Int64Type,
};

use crate::exec::error::{ExecError, Result};
use crate::exec::sortkey::encoder::{
    EncoderKind, NullMarkers, SortableNative, encode_bytes_sortable,
};

/// Typed access to the values of one column block, independent of the
/// concrete Arrow array type.
pub trait SortKeyValues: Send + Sync {
    fn is_valid_at(&self, idx: usize) -> bool;

    /// Compare two valid positions in the same order as their encodings.
    fn cmp_at(&self, a: usize, b: usize) -> Ordering;

    fn encode_at(&self, idx: usize, out: &mut Vec<u8>);

    /// Bit-exact encoding for row payloads. Defaults to the key encoding.
    #[inline]
    fn encode_payload_at(&self, idx: usize, out: &mut Vec<u8>) {
        self.encode_at(idx, out);
    }
}

impl<T> SortKeyValues for PrimitiveArray<T>
where
    T: ArrowPrimitiveType,
    T::Native: SortableNative,
{
    #[inline]
    fn is_valid_at(&self, idx: usize) -> bool {
        self.is_valid(idx)
    }

    #[inline]
    fn cmp_at(&self, a: usize, b: usize) -> Ordering {
        self.value(a).sortable_cmp(self.value(b))
    }

    #[inline]
    fn encode_at(&self, idx: usize, out: &mut Vec<u8>) {
        self.value(idx).encode_sortable(out);
    }

    #[inline]
    fn encode_payload_at(&self, idx: usize, out: &mut Vec<u8>) {
        self.value(idx).encode_raw(out);
    }
}

impl SortKeyValues for BooleanArray {
    #[inline]
    fn is_valid_at(&self, idx: usize) -> bool {
        self.is_valid(idx)
    }

    #[inline]
    fn cmp_at(&self, a: usize, b: usize) -> Ordering {
        self.value(a).cmp(&self.value(b))
    }

    #[inline]
    fn encode_at(&self, idx: usize, out: &mut Vec<u8>) {
        self.value(idx).encode_sortable(out);
    }
}

impl<O: OffsetSizeTrait> SortKeyValues for GenericStringArray<O> {
    #[inline]
    fn is_valid_at(&self, idx: usize) -> bool {
        self.is_valid(idx)
    }

    #[inline]
    fn cmp_at(&self, a: usize, b: usize) -> Ordering {
        self.value(a).as_bytes().cmp(self.value(b).as_bytes())
    }

    #[inline]
    fn encode_at(&self, idx: usize, out: &mut Vec<u8>) {
        encode_bytes_sortable(self.value(idx).as_bytes(), out);
    }
}

impl<O: OffsetSizeTrait> SortKeyValues for GenericBinaryArray<O> {
    #[inline]
    fn is_valid_at(&self, idx: usize) -> bool {
        self.is_valid(idx)
    }

    #[inline]
    fn cmp_at(&self, a: usize, b: usize) -> Ordering {
        self.value(a).cmp(self.value(b))
    }

    #[inline]
    fn encode_at(&self, idx: usize, out: &mut Vec<u8>) {
        encode_bytes_sortable(self.value(idx), out);
    }
}

/// Encoder family able to encode values of `data_type`, if any.
pub fn encoder_kind_for(data_type: &DataType) -> Option<EncoderKind> {
    match data_type {
        DataType::Boolean
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::Float32
        | DataType::Float64 => Some(EncoderKind::SortableDefault),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary => Some(EncoderKind::Utf8Sortable),
        _ => None,
    }
}

/// Typed value view of a scalar (non-list) array.
pub fn typed_values(array: &ArrayRef) -> Result<&dyn SortKeyValues> {
    let values: &dyn SortKeyValues = match array.data_type() {
        DataType::Boolean => array.as_boolean() as &dyn SortKeyValues,
        DataType::Int8 => array.as_primitive::<Int8Type>() as &dyn SortKeyValues,
        DataType::Int16 => array.as_primitive::<Int16Type>() as &dyn SortKeyValues,
        DataType::Int32 => array.as_primitive::<Int32Type>() as &dyn SortKeyValues,
        DataType::Int64 => array.as_primitive::<Int64Type>() as &dyn SortKeyValues,
        DataType::Float32 => array.as_primitive::<Float32Type>() as &dyn SortKeyValues,
        DataType::Float64 => array.as_primitive::<Float64Type>() as &dyn SortKeyValues,
        DataType::Utf8 => array.as_string::<i32>() as &dyn SortKeyValues,
        DataType::LargeUtf8 => array.as_string::<i64>() as &dyn SortKeyValues,
        DataType::Binary => array.as_binary::<i32>() as &dyn SortKeyValues,
        other => {
            return Err(ExecError::InvalidInput(format!(
                "unsupported column type {other}"
            )));
        }
    };
    Ok(values)
}

/// Typed value view checked against the configured encoder family.
fn sort_key_values(array: &ArrayRef, kind: EncoderKind) -> Result<&dyn SortKeyValues> {
    let expected = encoder_kind_for(array.data_type()).ok_or_else(|| {
        ExecError::InvalidInput(format!("unsupported sort key type {}", array.data_type()))
    })?;
    if expected != kind {
        return Err(ExecError::InvalidInput(format!(
            "encoder {} cannot encode sort key type {} (expected {})",
            kind.name(),
            array.data_type(),
            expected.name()
        )));
    }
    typed_values(array)
}

/// Which sub-value represents a multi-value cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MultiValuePick {
    /// Ascending sorts collapse to the smallest sub-value.
    Min,
    /// Descending sorts collapse to the largest sub-value.
    Max,
}

impl MultiValuePick {
    pub fn for_ascending(ascending: bool) -> Self {
        if ascending {
            MultiValuePick::Min
        } else {
            MultiValuePick::Max
        }
    }
}

enum BlockShape<'a> {
    /// Single-valued block without nulls: no per-row checks.
    Dense { values: &'a dyn SortKeyValues },
    /// Single-valued block that may contain nulls.
    Nullable { values: &'a dyn SortKeyValues },
    /// Multi-value block whose cells are sorted ascending.
    SortedMultiValue {
        offsets: &'a OffsetBuffer<i32>,
        nulls: Option<&'a NullBuffer>,
        values: &'a dyn SortKeyValues,
    },
    /// Multi-value block with no ordering guarantee inside a cell.
    UnorderedMultiValue {
        offsets: &'a OffsetBuffer<i32>,
        nulls: Option<&'a NullBuffer>,
        values: &'a dyn SortKeyValues,
    },
}

/// Key writer bound to one column block of one page.
pub struct KeyExtractor<'a> {
    shape: BlockShape<'a>,
    pick: MultiValuePick,
    markers: NullMarkers,
}

impl<'a> KeyExtractor<'a> {
    /// Pick the extractor variant for `array` once per page.
    pub fn select(
        array: &'a ArrayRef,
        kind: EncoderKind,
        ascending: bool,
        markers: NullMarkers,
        mv_sorted_ascending: bool,
    ) -> Result<Self> {
        let shape = match array.data_type() {
            DataType::List(_) => {
                let list = array.as_list::<i32>();
                let values = sort_key_values(list.values(), kind)?;
                let offsets = list.offsets();
                let nulls = list.nulls();
                if mv_sorted_ascending {
                    BlockShape::SortedMultiValue {
                        offsets,
                        nulls,
                        values,
                    }
                } else {
                    BlockShape::UnorderedMultiValue {
                        offsets,
                        nulls,
                        values,
                    }
                }
            }
            _ => {
                let values = sort_key_values(array, kind)?;
                if array.null_count() == 0 {
                    BlockShape::Dense { values }
                } else {
                    BlockShape::Nullable { values }
                }
            }
        };
        Ok(Self {
            shape,
            pick: MultiValuePick::for_ascending(ascending),
            markers,
        })
    }

    /// Append the indicator byte and, for non-null cells, the encoded value.
    /// Returns whether the cell was non-null.
    #[inline]
    pub fn write(&self, row: usize, out: &mut Vec<u8>) -> bool {
        let (values, idx) = match &self.shape {
            BlockShape::Dense { values } => (*values, Some(row)),
            BlockShape::Nullable { values } => {
                (*values, values.is_valid_at(row).then_some(row))
            }
            BlockShape::SortedMultiValue {
                offsets,
                nulls,
                values,
            } => (
                *values,
                cell_range(offsets, *nulls, row)
                    .and_then(|(start, end)| pick_sorted(*values, start, end, self.pick)),
            ),
            BlockShape::UnorderedMultiValue {
                offsets,
                nulls,
                values,
            } => (
                *values,
                cell_range(offsets, *nulls, row)
                    .and_then(|(start, end)| pick_unordered(*values, start, end, self.pick)),
            ),
        };
        match idx {
            Some(idx) => {
                out.push(self.markers.non_null);
                values.encode_at(idx, out);
                true
            }
            None => {
                out.push(self.markers.null);
                false
            }
        }
    }

    pub fn shape_name(&self) -> &'static str {
        match self.shape {
            BlockShape::Dense { .. } => "dense",
            BlockShape::Nullable { .. } => "nullable",
            BlockShape::SortedMultiValue { .. } => "sorted_multi_value",
            BlockShape::UnorderedMultiValue { .. } => "unordered_multi_value",
        }
    }
}

#[inline]
fn cell_range(
    offsets: &OffsetBuffer<i32>,
    nulls: Option<&NullBuffer>,
    row: usize,
) -> Option<(usize, usize)> {
    if nulls.is_some_and(|n| n.is_null(row)) {
        return None;
    }
    let start = offsets[row] as usize;
    let end = offsets[row + 1] as usize;
    (start < end).then_some((start, end))
}

// Null sub-values never represent a cell; a cell of only nulls is null.
#[inline]
fn pick_sorted(
    values: &dyn SortKeyValues,
    start: usize,
    end: usize,
    pick: MultiValuePick,
) -> Option<usize> {
    match pick {
        MultiValuePick::Min => (start..end).find(|i| values.is_valid_at(*i)),
        MultiValuePick::Max => (start..end).rev().find(|i| values.is_valid_at(*i)),
    }
}

#[inline]
fn pick_unordered(
    values: &dyn SortKeyValues,
    start: usize,
    end: usize,
    pick: MultiValuePick,
) -> Option<usize> {
    let mut best: Option<usize> = None;
    for i in start..end {
        if !values.is_valid_at(i) {
            continue;
        }
        best = match best {
            None => Some(i),
            Some(b) => {
                let ord = values.cmp_at(i, b);
                let better = match pick {
                    MultiValuePick::Min => ord == Ordering::Less,
                    MultiValuePick::Max => ord == Ordering::Greater,
                };
                if better { Some(i) } else { Some(b) }
            }
        };
    }
    best
}
