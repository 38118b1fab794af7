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
//! Row payload serialization and the retained-row payload store.
//!
//! Responsibilities:
//! - Serialize every output column of one row into a self-contained byte
//!   string so the source page can be released after `push_chunk`.
//! - Decode payloads back into typed Arrow builders (`PageBuilder`).
//! - Own retained payloads together with their memory reservations.
//!
//! Row layout, per column in schema order:
//! - scalar: `0x00` for null, or `0x01` followed by the value;
//! - list: `0x00` for a null list, or `0x01`, a big-endian `u32` item count,
//!   then each item as a scalar.
//! Values reuse the sort key encodings, except floats, which keep their raw
//! bits so NaN payloads survive.

use arrow::array::{
    Array, ArrayBuilder, ArrayRef, AsArray, BinaryBuilder, BooleanBuilder, LargeStringBuilder,
    ListBuilder, PrimitiveBuilder, StringBuilder, make_builder,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type,
    Int64Type, SchemaRef,
};

use crate::exec::chunk::Chunk;
use crate::exec::error::{ExecError, Result};
use crate::exec::sortkey::encoder::{SortableNative, decode_bytes_sortable};
use crate::exec::sortkey::extractor::{SortKeyValues, encoder_kind_for, typed_values};
use crate::runtime::mem_tracker::Reservation;

const ABSENT: u8 = 0x00;
const PRESENT: u8 = 0x01;

fn check_payload_type(data_type: &DataType) -> Result<()> {
    let scalar = match data_type {
        DataType::List(item) => item.data_type(),
        other => other,
    };
    if encoder_kind_for(scalar).is_none() {
        return Err(ExecError::InvalidInput(format!(
            "unsupported output column type {data_type}"
        )));
    }
    Ok(())
}

/// Validate that every column of `schema` can be carried through the payload store.
pub fn validate_payload_schema(schema: &SchemaRef) -> Result<()> {
    for field in schema.fields() {
        check_payload_type(field.data_type()).map_err(|e| match e {
            ExecError::InvalidInput(msg) => {
                ExecError::InvalidInput(format!("column '{}': {}", field.name(), msg))
            }
            other => other,
        })?;
    }
    Ok(())
}

enum ColumnSource<'a> {
    Scalar(&'a dyn SortKeyValues),
    List {
        offsets: &'a OffsetBuffer<i32>,
        nulls: Option<&'a NullBuffer>,
        values: &'a dyn SortKeyValues,
    },
}

/// Payload serializer bound to one input page.
pub struct PayloadWriter<'a> {
    columns: Vec<ColumnSource<'a>>,
}

impl<'a> PayloadWriter<'a> {
    pub fn bind(chunk: &'a Chunk) -> Result<Self> {
        let mut columns = Vec::with_capacity(chunk.num_columns());
        for array in chunk.columns() {
            check_payload_type(array.data_type())?;
            let source = match array.data_type() {
                DataType::List(_) => {
                    let list = array.as_list::<i32>();
                    ColumnSource::List {
                        offsets: list.offsets(),
                        nulls: list.nulls(),
                        values: typed_values(list.values())?,
                    }
                }
                _ => ColumnSource::Scalar(typed_values(array)?),
            };
            columns.push(source);
        }
        Ok(Self { columns })
    }

    /// Serialize row `row` into `out` (cleared first).
    pub fn write_row(&self, row: usize, out: &mut Vec<u8>) {
        out.clear();
        for column in &self.columns {
            match column {
                ColumnSource::Scalar(values) => write_scalar(*values, row, out),
                ColumnSource::List {
                    offsets,
                    nulls,
                    values,
                } => {
                    if nulls.is_some_and(|n| n.is_null(row)) {
                        out.push(ABSENT);
                        continue;
                    }
                    let start = offsets[row] as usize;
                    let end = offsets[row + 1] as usize;
                    out.push(PRESENT);
                    out.extend_from_slice(&((end - start) as u32).to_be_bytes());
                    for idx in start..end {
                        write_scalar(*values, idx, out);
                    }
                }
            }
        }
    }
}

#[inline]
fn write_scalar(values: &dyn SortKeyValues, idx: usize, out: &mut Vec<u8>) {
    if values.is_valid_at(idx) {
        out.push(PRESENT);
        values.encode_payload_at(idx, out);
    } else {
        out.push(ABSENT);
    }
}

struct PayloadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(corrupted(format!(
                "need {} bytes at offset {}, payload has {}",
                n,
                self.pos,
                self.buf.len()
            )));
        };
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn flag(&mut self) -> Result<bool> {
        match self.take(1)?[0] {
            PRESENT => Ok(true),
            ABSENT => Ok(false),
            other => Err(corrupted(format!("bad presence byte {other:#04x}"))),
        }
    }

    fn count(&mut self) -> Result<usize> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
    }

    fn fixed<T: SortableNative>(&mut self) -> Result<T> {
        Ok(T::decode_raw(self.take(T::WIDTH)?))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let (value, consumed) = decode_bytes_sortable(&self.buf[self.pos..])
            .ok_or_else(|| corrupted(format!("unterminated byte string at offset {}", self.pos)))?;
        self.pos += consumed;
        Ok(value)
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }
}

fn corrupted(detail: String) -> ExecError {
    ExecError::Internal(format!("corrupted row payload: {detail}"))
}

fn downcast<B: ArrayBuilder>(builder: &mut dyn ArrayBuilder) -> Result<&mut B> {
    builder
        .as_any_mut()
        .downcast_mut::<B>()
        .ok_or_else(|| ExecError::Internal("payload builder type mismatch".to_string()))
}

fn append_fixed<T>(builder: &mut dyn ArrayBuilder, cursor: &mut PayloadCursor<'_>) -> Result<()>
where
    T: ArrowPrimitiveType,
    T::Native: SortableNative,
{
    let builder = downcast::<PrimitiveBuilder<T>>(builder)?;
    if cursor.flag()? {
        builder.append_value(cursor.fixed::<T::Native>()?);
    } else {
        builder.append_null();
    }
    Ok(())
}

fn append_scalar(
    builder: &mut dyn ArrayBuilder,
    data_type: &DataType,
    cursor: &mut PayloadCursor<'_>,
) -> Result<()> {
    match data_type {
        DataType::Boolean => {
            let builder = downcast::<BooleanBuilder>(builder)?;
            if cursor.flag()? {
                builder.append_value(cursor.fixed::<bool>()?);
            } else {
                builder.append_null();
            }
        }
        DataType::Int8 => append_fixed::<Int8Type>(builder, cursor)?,
        DataType::Int16 => append_fixed::<Int16Type>(builder, cursor)?,
        DataType::Int32 => append_fixed::<Int32Type>(builder, cursor)?,
        DataType::Int64 => append_fixed::<Int64Type>(builder, cursor)?,
        DataType::Float32 => append_fixed::<Float32Type>(builder, cursor)?,
        DataType::Float64 => append_fixed::<Float64Type>(builder, cursor)?,
        DataType::Utf8 | DataType::LargeUtf8 => {
            let value = if cursor.flag()? {
                let raw = cursor.bytes()?;
                Some(String::from_utf8(raw).map_err(|e| corrupted(e.to_string()))?)
            } else {
                None
            };
            if matches!(data_type, DataType::Utf8) {
                downcast::<StringBuilder>(builder)?.append_option(value);
            } else {
                downcast::<LargeStringBuilder>(builder)?.append_option(value);
            }
        }
        DataType::Binary => {
            let value = if cursor.flag()? {
                Some(cursor.bytes()?)
            } else {
                None
            };
            downcast::<BinaryBuilder>(builder)?.append_option(value);
        }
        other => {
            return Err(ExecError::Internal(format!(
                "payload column type {other} has no decoder"
            )));
        }
    }
    Ok(())
}

/// Accumulates decoded payload rows into one output page.
pub struct PageBuilder {
    schema: SchemaRef,
    builders: Vec<Box<dyn ArrayBuilder>>,
    rows: usize,
    payload_bytes: usize,
}

impl PageBuilder {
    pub fn new(schema: SchemaRef, capacity: usize) -> Self {
        let builders = schema
            .fields()
            .iter()
            .map(|f| make_builder(f.data_type(), capacity))
            .collect();
        Self {
            schema,
            builders,
            rows: 0,
            payload_bytes: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    pub fn append_row(&mut self, payload: &[u8]) -> Result<()> {
        let mut cursor = PayloadCursor::new(payload);
        for (field, builder) in self.schema.fields().iter().zip(self.builders.iter_mut()) {
            match field.data_type() {
                DataType::List(item) => {
                    let list = downcast::<ListBuilder<Box<dyn ArrayBuilder>>>(builder.as_mut())?;
                    if !cursor.flag()? {
                        list.append_null();
                        continue;
                    }
                    let n = cursor.count()?;
                    for _ in 0..n {
                        append_scalar(list.values().as_mut(), item.data_type(), &mut cursor)?;
                    }
                    list.append(true);
                }
                other => append_scalar(builder.as_mut(), other, &mut cursor)?,
            }
        }
        if !cursor.is_exhausted() {
            return Err(corrupted(format!(
                "{} trailing bytes",
                payload.len() - cursor.pos
            )));
        }
        self.rows += 1;
        self.payload_bytes += payload.len();
        Ok(())
    }

    /// Emit the accumulated rows as a page and reset the builder.
    pub fn finish(&mut self) -> Result<Chunk> {
        let columns: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        self.rows = 0;
        self.payload_bytes = 0;
        Chunk::try_new(self.schema.clone(), columns)
    }
}

/// Opaque reference to a retained row payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PayloadSlot(u32);

#[derive(Debug)]
struct StoredRow {
    payload: Vec<u8>,
    // Released on drop.
    reservation: Reservation,
}

/// Slab of serialized payloads for the rows currently retained by the queue.
#[derive(Debug, Default)]
pub struct RowPayloadStore {
    slots: Vec<Option<StoredRow>>,
    free: Vec<u32>,
    len: usize,
    bytes: usize,
    reserved: i64,
}

impl RowPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Serialized bytes currently held.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Bytes reserved against the accountant for the rows currently held.
    pub fn reserved_bytes(&self) -> i64 {
        self.reserved
    }

    pub fn insert(&mut self, payload: Vec<u8>, reservation: Reservation) -> PayloadSlot {
        self.len += 1;
        self.bytes += payload.len();
        self.reserved += reservation.bytes();
        let row = StoredRow {
            payload,
            reservation,
        };
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(row);
            return PayloadSlot(idx);
        }
        self.slots.push(Some(row));
        PayloadSlot((self.slots.len() - 1) as u32)
    }

    pub fn payload_len(&self, slot: PayloadSlot) -> Option<usize> {
        self.slots
            .get(slot.0 as usize)
            .and_then(Option::as_ref)
            .map(|row| row.payload.len())
    }

    /// Remove a payload, releasing its reservation. Returns the payload bytes.
    pub fn remove(&mut self, slot: PayloadSlot) -> Option<Vec<u8>> {
        let row = self.slots.get_mut(slot.0 as usize)?.take()?;
        self.free.push(slot.0);
        self.len -= 1;
        self.bytes -= row.payload.len();
        self.reserved -= row.reservation.bytes();
        Some(row.payload)
    }

    /// Drop every payload and release every reservation.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.len = 0;
        self.bytes = 0;
        self.reserved = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mem_tracker::{MemTracker, MemoryAccountant};
    use arrow::array::{
        BinaryArray, BooleanArray, Float64Array, Int32Array, LargeStringArray, ListArray,
        StringArray,
    };
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn mixed_chunk() -> Chunk {
        let item = Arc::new(Field::new("item", DataType::Int32, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("b", DataType::Boolean, true),
            Field::new("i", DataType::Int32, true),
            Field::new("f", DataType::Float64, true),
            Field::new("s", DataType::Utf8, true),
            Field::new("ls", DataType::LargeUtf8, true),
            Field::new("bin", DataType::Binary, true),
            Field::new("l", DataType::List(item), true),
        ]));
        let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(3), None, Some(-1)]),
            None,
            Some(vec![]),
        ]);
        Chunk::try_new(
            schema,
            vec![
                Arc::new(BooleanArray::from(vec![Some(true), None, Some(false)])) as ArrayRef,
                Arc::new(Int32Array::from(vec![Some(i32::MIN), Some(0), None])) as ArrayRef,
                Arc::new(Float64Array::from(vec![Some(-0.0), Some(f64::INFINITY), None]))
                    as ArrayRef,
                Arc::new(StringArray::from(vec![Some("héllo"), Some(""), None])) as ArrayRef,
                Arc::new(LargeStringArray::from(vec![None, Some("x\u{0}y"), Some("z")]))
                    as ArrayRef,
                Arc::new(BinaryArray::from(vec![
                    Some(&b"\x00\xff"[..]),
                    None,
                    Some(&b""[..]),
                ])) as ArrayRef,
                Arc::new(list) as ArrayRef,
            ],
        )
        .expect("chunk")
    }

    #[test]
    fn payload_round_trips_every_supported_type() {
        let chunk = mixed_chunk();
        let writer = PayloadWriter::bind(&chunk).expect("bind");
        let mut builder = PageBuilder::new(chunk.schema(), chunk.len());
        let mut buf = Vec::new();
        for row in 0..chunk.len() {
            writer.write_row(row, &mut buf);
            builder.append_row(&buf).expect("append");
        }
        assert_eq!(builder.rows(), 3);
        let out = builder.finish().expect("finish");
        assert_eq!(out.batch, chunk.batch);
        assert_eq!(builder.rows(), 0);
    }

    #[test]
    fn rows_can_be_decoded_out_of_order() {
        let chunk = mixed_chunk();
        let writer = PayloadWriter::bind(&chunk).expect("bind");
        let mut builder = PageBuilder::new(chunk.schema(), 2);
        let mut buf = Vec::new();
        writer.write_row(2, &mut buf);
        builder.append_row(&buf).expect("row 2");
        writer.write_row(0, &mut buf);
        builder.append_row(&buf).expect("row 0");
        let out = builder.finish().expect("finish");
        let ints = out.columns()[1].as_primitive::<Int32Type>();
        assert!(ints.is_null(0));
        assert_eq!(ints.value(1), i32::MIN);
    }

    #[test]
    fn float_payloads_keep_exact_nan_bits() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("d", DataType::Float64, true),
            Field::new("f", DataType::Float32, true),
        ]));
        let doubles = [
            f64::from_bits(0xFFF8_0000_0000_0001),
            -f64::NAN,
            f64::from_bits(0x7FF8_0000_0000_0042),
            -0.0,
        ];
        let floats = [
            f32::from_bits(0xFFC0_0001),
            -f32::NAN,
            f32::from_bits(0x7FC0_0042),
            -0.0,
        ];
        let chunk = Chunk::try_new(
            schema.clone(),
            vec![
                Arc::new(Float64Array::from(doubles.to_vec())) as ArrayRef,
                Arc::new(arrow::array::Float32Array::from(floats.to_vec())) as ArrayRef,
            ],
        )
        .expect("chunk");
        let writer = PayloadWriter::bind(&chunk).expect("bind");
        let mut builder = PageBuilder::new(schema, chunk.len());
        let mut buf = Vec::new();
        for row in 0..chunk.len() {
            writer.write_row(row, &mut buf);
            builder.append_row(&buf).expect("append");
        }
        let out = builder.finish().expect("finish");
        let out_doubles = out.columns()[0].as_primitive::<Float64Type>();
        let out_floats = out.columns()[1].as_primitive::<Float32Type>();
        for (row, (d, f)) in doubles.iter().zip(floats.iter()).enumerate() {
            assert_eq!(out_doubles.value(row).to_bits(), d.to_bits(), "row {row}");
            assert_eq!(out_floats.value(row).to_bits(), f.to_bits(), "row {row}");
        }
    }

    #[test]
    fn truncated_payload_is_reported() {
        let chunk = mixed_chunk();
        let writer = PayloadWriter::bind(&chunk).expect("bind");
        let mut buf = Vec::new();
        writer.write_row(0, &mut buf);
        buf.truncate(buf.len() - 1);
        let mut builder = PageBuilder::new(chunk.schema(), 1);
        let err = builder.append_row(&buf).expect_err("truncated");
        assert!(matches!(err, ExecError::Internal(_)), "err={err}");
    }

    #[test]
    fn unsupported_output_type_is_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "d",
            DataType::Date32,
            true,
        )]));
        let err = validate_payload_schema(&schema).expect_err("unsupported");
        assert!(err.to_string().contains("column 'd'"), "err={err}");
    }

    #[test]
    fn store_reuses_slots_and_releases_reservations() {
        let tracker = MemTracker::new_root("store");
        let accountant: Arc<dyn MemoryAccountant> = tracker.clone();
        let mut store = RowPayloadStore::new();
        let a = store.insert(
            vec![1, 2, 3],
            Reservation::try_new(10, Arc::clone(&accountant)).expect("reserve"),
        );
        let b = store.insert(
            vec![4],
            Reservation::try_new(10, Arc::clone(&accountant)).expect("reserve"),
        );
        assert_eq!(tracker.current(), 20);
        assert_eq!(store.reserved_bytes(), 20);
        assert_eq!(store.bytes(), 4);
        assert_eq!(store.remove(a), Some(vec![1, 2, 3]));
        assert_eq!(store.remove(a), None);
        assert_eq!(tracker.current(), 10);
        let c = store.insert(
            vec![5, 6],
            Reservation::try_new(10, Arc::clone(&accountant)).expect("reserve"),
        );
        assert_eq!(c, a);
        assert_eq!(store.payload_len(b), Some(1));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(tracker.current(), 0);
    }
}
