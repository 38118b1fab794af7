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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering};

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Builder, Int32Builder, Int64Array, ListBuilder,
    StringBuilder,
};
use arrow::datatypes::{DataType, Field, Float64Type, Int32Type, Int64Type, Schema, SchemaRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use topn_engine::topn_config::TopNEngineConfig;
use topn_engine::{Chunk, MemoryAccountant, MemoryLimitExceeded, TopNOperator};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a test configuration file from `content`.
    pub fn with_content(content: &str) -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_topn.toml");
        std::fs::write(&config_path, content)?;
        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_content(
            r#"
log_level = "debug"

[topn]
emit_page_byte_size_hint = 65536
max_page_rows = 512
memory_limit_bytes = 67108864

[workload]
rows = 2000
top_count = 100
"#,
        )
    }

    pub fn load_config(&self) -> anyhow::Result<TopNEngineConfig> {
        TopNEngineConfig::load_from_file(&self.config_path)
    }
}

/// Accountant stub that counts every call and enforces an optional cap.
#[derive(Debug, Default)]
pub struct CountingAccountant {
    limit: Option<i64>,
    in_use: AtomicI64,
    reserve_calls: AtomicU64,
    release_calls: AtomicU64,
    refused: AtomicU64,
    reserved_bytes: AtomicI64,
    released_bytes: AtomicI64,
}

impl CountingAccountant {
    pub fn unlimited() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_limit(limit: i64) -> Arc<Self> {
        Arc::new(Self {
            limit: Some(limit),
            ..Self::default()
        })
    }

    pub fn in_use(&self) -> i64 {
        self.in_use.load(AtomicOrdering::SeqCst)
    }

    pub fn reserve_calls(&self) -> u64 {
        self.reserve_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn release_calls(&self) -> u64 {
        self.release_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn refused(&self) -> u64 {
        self.refused.load(AtomicOrdering::SeqCst)
    }

    pub fn reserved_bytes(&self) -> i64 {
        self.reserved_bytes.load(AtomicOrdering::SeqCst)
    }

    pub fn released_bytes(&self) -> i64 {
        self.released_bytes.load(AtomicOrdering::SeqCst)
    }
}

impl MemoryAccountant for CountingAccountant {
    fn reserve(&self, bytes: i64) -> Result<(), MemoryLimitExceeded> {
        self.reserve_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let used = self.in_use.load(AtomicOrdering::SeqCst);
        if let Some(limit) = self.limit
            && used + bytes > limit
        {
            self.refused.fetch_add(1, AtomicOrdering::SeqCst);
            return Err(MemoryLimitExceeded {
                label: "counting".to_string(),
                requested: bytes,
                used,
                limit,
            });
        }
        self.in_use.fetch_add(bytes, AtomicOrdering::SeqCst);
        self.reserved_bytes.fetch_add(bytes, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn release(&self, bytes: i64) {
        self.release_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.in_use.fetch_sub(bytes, AtomicOrdering::SeqCst);
        self.released_bytes.fetch_add(bytes, AtomicOrdering::SeqCst);
    }
}

/// One logical row of the random workload.
#[derive(Clone, Debug)]
pub struct TestRow {
    pub id: i64,
    pub score: Option<f64>,
    pub name: Option<String>,
    pub tags: Option<Vec<Option<i32>>>,
}

impl PartialEq for TestRow {
    fn eq(&self, other: &Self) -> bool {
        let score_eq = match (self.score, other.score) {
            (Some(a), Some(b)) => a.to_bits() == b.to_bits(),
            (None, None) => true,
            _ => false,
        };
        self.id == other.id && score_eq && self.name == other.name && self.tags == other.tags
    }
}

pub fn workload_schema() -> SchemaRef {
    let item = Arc::new(Field::new("item", DataType::Int32, true));
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("score", DataType::Float64, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("tags", DataType::List(item), true),
    ]))
}

pub const ID: usize = 0;
pub const SCORE: usize = 1;
pub const NAME: usize = 2;
pub const TAGS: usize = 3;

const NAMES: &[&str] = &["", "a", "a\u{0}b", "ab", "b", "zeta", "Ω", "mid"];

pub fn random_rows(seed: u64, rows: usize) -> Vec<TestRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows as i64)
        .map(|id| {
            let score = match rng.gen_range(0..100) {
                0..=7 => None,
                8 => Some(f64::NAN),
                9 => Some(-0.0),
                10 => Some(f64::INFINITY),
                _ => Some(f64::from(rng.gen_range(-40..40i32)) / 2.0),
            };
            let name = if rng.gen_bool(0.1) {
                None
            } else {
                Some(NAMES[rng.gen_range(0..NAMES.len())].to_string())
            };
            let tags = if rng.gen_bool(0.1) {
                None
            } else {
                let n = rng.gen_range(0..4);
                Some(
                    (0..n)
                        .map(|_| {
                            if rng.gen_bool(0.1) {
                                None
                            } else {
                                Some(rng.gen_range(-20..20))
                            }
                        })
                        .collect(),
                )
            };
            TestRow {
                id,
                score,
                name,
                tags,
            }
        })
        .collect()
}

pub fn rows_to_chunk(schema: &SchemaRef, rows: &[TestRow]) -> Chunk {
    let mut scores = Float64Builder::with_capacity(rows.len());
    let mut names = StringBuilder::new();
    let mut tags = ListBuilder::new(Int32Builder::new());
    for row in rows {
        scores.append_option(row.score);
        names.append_option(row.name.as_deref());
        match &row.tags {
            Some(items) => {
                for item in items {
                    tags.values().append_option(*item);
                }
                tags.append(true);
            }
            None => tags.append(false),
        }
    }
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    Chunk::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(ids)) as ArrayRef,
            Arc::new(scores.finish()) as ArrayRef,
            Arc::new(names.finish()) as ArrayRef,
            Arc::new(tags.finish()) as ArrayRef,
        ],
    )
    .expect("workload chunk")
}

pub fn paginate(schema: &SchemaRef, rows: &[TestRow], page_rows: usize) -> Vec<Chunk> {
    rows.chunks(page_rows.max(1))
        .map(|page| rows_to_chunk(schema, page))
        .collect()
}

pub fn chunk_to_rows(chunk: &Chunk) -> Vec<TestRow> {
    let ids = chunk.columns()[ID].as_primitive::<Int64Type>();
    let scores = chunk.columns()[SCORE].as_primitive::<Float64Type>();
    let names = chunk.columns()[NAME].as_string::<i32>();
    let tags = chunk.columns()[TAGS].as_list::<i32>();
    (0..chunk.len())
        .map(|i| TestRow {
            id: ids.value(i),
            score: scores.is_valid(i).then(|| scores.value(i)),
            name: names.is_valid(i).then(|| names.value(i).to_string()),
            tags: tags.is_valid(i).then(|| {
                let cell = tags.value(i);
                let cell = cell.as_primitive::<Int32Type>();
                (0..cell.len())
                    .map(|j| cell.is_valid(j).then(|| cell.value(j)))
                    .collect()
            }),
        })
        .collect()
}

pub fn chunks_to_rows(chunks: &[Chunk]) -> Vec<TestRow> {
    chunks.iter().flat_map(chunk_to_rows).collect()
}

/// ORDER BY entry for the reference sort.
#[derive(Clone, Copy, Debug)]
pub struct RefKey {
    pub column: usize,
    pub ascending: bool,
    pub nulls_first: bool,
}

fn cmp_nullable<T>(
    a: Option<T>,
    b: Option<T>,
    key: RefKey,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => {
            if key.nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (Some(_), None) => {
            if key.nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Some(x), Some(y)) => {
            let ord = cmp(&x, &y);
            if key.ascending { ord } else { ord.reverse() }
        }
    }
}

/// Min of the non-null items for ascending keys, max for descending ones.
fn representative_tag(tags: &Option<Vec<Option<i32>>>, ascending: bool) -> Option<i32> {
    let items = tags.as_ref()?.iter().flatten().copied();
    if ascending { items.min() } else { items.max() }
}

fn cmp_rows(a: &TestRow, b: &TestRow, keys: &[RefKey]) -> Ordering {
    for key in keys {
        let ord = match key.column {
            ID => cmp_nullable(Some(a.id), Some(b.id), *key, |x, y| x.cmp(y)),
            SCORE => cmp_nullable(a.score, b.score, *key, |x, y| x.total_cmp(y)),
            NAME => cmp_nullable(a.name.as_ref(), b.name.as_ref(), *key, |x, y| {
                x.as_bytes().cmp(y.as_bytes())
            }),
            TAGS => cmp_nullable(
                representative_tag(&a.tags, key.ascending),
                representative_tag(&b.tags, key.ascending),
                *key,
                |x, y| x.cmp(y),
            ),
            other => panic!("no reference ordering for column {other}"),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Full stable sort then truncate: ties keep arrival order.
pub fn reference_top_n(rows: &[TestRow], keys: &[RefKey], k: usize) -> Vec<TestRow> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| cmp_rows(a, b, keys));
    sorted.truncate(k);
    sorted
}

/// Drive an operator through finish and collect every output page.
pub fn run_to_end(op: &mut TopNOperator, pages: &[Chunk]) -> topn_engine::Result<Vec<Chunk>> {
    for page in pages {
        op.add_input(page)?;
    }
    op.finish()?;
    let mut out = Vec::new();
    while let Some(page) = op.get_output()? {
        out.push(page);
    }
    Ok(out)
}
