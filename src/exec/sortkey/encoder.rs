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
//! Byte-comparable encodings for single typed values.
//!
//! Every encoder appends bytes whose unsigned lexicographic order equals the
//! ascending natural order of the value. Encoders are direction-agnostic:
//! descending columns are produced by inverting the appended range.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Encoder family used for one sort column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    /// Numerics and booleans: fixed width, sign-bias / sortable-bit transforms.
    SortableDefault,
    /// UTF-8 strings and raw byte strings: escaped and terminated content.
    Utf8Sortable,
}

impl EncoderKind {
    pub fn name(self) -> &'static str {
        match self {
            EncoderKind::SortableDefault => "sortable_default",
            EncoderKind::Utf8Sortable => "utf8_sortable",
        }
    }
}

/// Indicator bytes written ahead of every sort column.
///
/// Whichever byte is lower decides whether nulls sort first or last. The
/// indicator is never inverted for descending columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NullMarkers {
    pub null: u8,
    pub non_null: u8,
}

impl NullMarkers {
    pub const NULLS_FIRST: NullMarkers = NullMarkers {
        null: 0x00,
        non_null: 0x01,
    };
    pub const NULLS_LAST: NullMarkers = NullMarkers {
        null: 0x01,
        non_null: 0x00,
    };

    pub fn for_nulls_first(nulls_first: bool) -> Self {
        if nulls_first {
            Self::NULLS_FIRST
        } else {
            Self::NULLS_LAST
        }
    }
}

/// Fixed-width native values with a byte-comparable, reversible encoding.
pub trait SortableNative: Copy + Send + Sync + 'static {
    const WIDTH: usize;

    fn encode_sortable(self, out: &mut Vec<u8>);

    /// Inverse of `encode_sortable`. `bytes` holds exactly `WIDTH` bytes.
    fn decode_sortable(bytes: &[u8]) -> Self;

    /// Total order agreeing with the encoded byte order.
    fn sortable_cmp(self, other: Self) -> Ordering;

    /// Exact, bit-preserving encoding used for row payloads. Not comparable.
    #[inline]
    fn encode_raw(self, out: &mut Vec<u8>) {
        self.encode_sortable(out);
    }

    /// Inverse of `encode_raw`.
    #[inline]
    fn decode_raw(bytes: &[u8]) -> Self {
        Self::decode_sortable(bytes)
    }
}

macro_rules! impl_sortable_int {
    ($native:ty, $unsigned:ty) => {
        impl SortableNative for $native {
            const WIDTH: usize = std::mem::size_of::<$native>();

            #[inline]
            fn encode_sortable(self, out: &mut Vec<u8>) {
                let biased = (self as $unsigned) ^ (1 << (<$unsigned>::BITS - 1));
                out.extend_from_slice(&biased.to_be_bytes());
            }

            #[inline]
            fn decode_sortable(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$native>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                (<$unsigned>::from_be_bytes(raw) ^ (1 << (<$unsigned>::BITS - 1))) as $native
            }

            #[inline]
            fn sortable_cmp(self, other: Self) -> Ordering {
                self.cmp(&other)
            }
        }
    };
}

impl_sortable_int!(i8, u8);
impl_sortable_int!(i16, u16);
impl_sortable_int!(i32, u32);
impl_sortable_int!(i64, u64);

// NaN collapses to the canonical quiet NaN so that every NaN encodes the same
// and sorts after +Infinity.
macro_rules! sortable_float_bits {
    ($value:expr, $native:ty, $bits:ty) => {{
        const SIGN: $bits = 1 << (<$bits>::BITS - 1);
        let v: $native = $value;
        let bits = if v.is_nan() {
            <$native>::NAN.to_bits()
        } else {
            v.to_bits()
        };
        if bits & SIGN != 0 { !bits } else { bits | SIGN }
    }};
}

macro_rules! impl_sortable_float {
    ($native:ty, $bits:ty) => {
        impl SortableNative for $native {
            const WIDTH: usize = std::mem::size_of::<$native>();

            #[inline]
            fn encode_sortable(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&sortable_float_bits!(self, $native, $bits).to_be_bytes());
            }

            #[inline]
            fn decode_sortable(bytes: &[u8]) -> Self {
                const SIGN: $bits = 1 << (<$bits>::BITS - 1);
                let mut raw = [0u8; std::mem::size_of::<$native>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                let encoded = <$bits>::from_be_bytes(raw);
                let bits = if encoded & SIGN != 0 {
                    encoded ^ SIGN
                } else {
                    !encoded
                };
                <$native>::from_bits(bits)
            }

            #[inline]
            fn sortable_cmp(self, other: Self) -> Ordering {
                sortable_float_bits!(self, $native, $bits)
                    .cmp(&sortable_float_bits!(other, $native, $bits))
            }

            // NaN sign and payload bits survive, unlike the sortable form.
            #[inline]
            fn encode_raw(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_bits().to_be_bytes());
            }

            #[inline]
            fn decode_raw(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$native>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$native>::from_bits(<$bits>::from_be_bytes(raw))
            }
        }
    };
}

impl_sortable_float!(f32, u32);
impl_sortable_float!(f64, u64);

/// Booleans encode as a single byte: false < true.
impl SortableNative for bool {
    const WIDTH: usize = 1;

    #[inline]
    fn encode_sortable(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    #[inline]
    fn decode_sortable(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    #[inline]
    fn sortable_cmp(self, other: Self) -> Ordering {
        self.cmp(&other)
    }
}

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: [u8; 2] = [0x00, 0x00];

/// Append an escaped, terminated byte string.
///
/// `0x00` becomes `0x00 0xFF` and the field ends with `0x00 0x00`, so a value
/// always sorts before any of its extensions and the terminator can never be
/// confused with content of the next field.
#[inline]
pub fn encode_bytes_sortable(value: &[u8], out: &mut Vec<u8>) {
    out.reserve(value.len() + TERMINATOR.len());
    let mut rest = value;
    while let Some(pos) = rest.iter().position(|b| *b == ESCAPE) {
        out.extend_from_slice(&rest[..pos]);
        out.push(ESCAPE);
        out.push(ESCAPED_ZERO);
        rest = &rest[pos + 1..];
    }
    out.extend_from_slice(rest);
    out.extend_from_slice(&TERMINATOR);
}

/// Inverse of `encode_bytes_sortable`: returns the content and the number of
/// input bytes consumed, or `None` if `input` is not a terminated field.
pub fn decode_bytes_sortable(input: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut pos = 0;
    loop {
        let rel = input[pos..].iter().position(|b| *b == ESCAPE)?;
        out.extend_from_slice(&input[pos..pos + rel]);
        pos += rel;
        match *input.get(pos + 1)? {
            ESCAPED_ZERO => {
                out.push(0x00);
                pos += 2;
            }
            0x00 => return Some((out, pos + TERMINATOR.len())),
            _ => return None,
        }
    }
}

/// Flip every byte of `bytes`, turning an ascending encoding into a descending one.
#[inline]
pub fn invert(bytes: &mut [u8]) {
    for b in bytes {
        *b = !*b;
    }
}
