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
use std::env;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use arrow::array::{ArrayRef, Float64Builder, Int32Builder, Int64Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use topn_engine::topn_config;
use topn_engine::topn_logging::{self, info};
use topn_engine::{
    Chunk, EncoderKind, InputOrdering, MemTracker, MemoryAccountant, SortColumn, TopNConfig,
    TopNOperator, TopNStatus,
};

struct Args {
    config_path: Option<String>,
    rows: Option<usize>,
    limit: Option<i64>,
    page_rows: Option<usize>,
    seed: Option<u64>,
}

fn usage() {
    eprintln!(
        "Usage: topn-engine [--config <path>] [--rows <n>] [--limit <k>] [--page-rows <n>] [--seed <n>]"
    );
    eprintln!("  Runs a seeded synthetic workload through the TopN operator and prints its status.");
    eprintln!("  ORDER BY score DESC NULLS LAST, id ASC LIMIT k");
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = value.ok_or_else(|| anyhow!("missing value for {flag}"))?;
    raw.parse::<T>()
        .map_err(|e| anyhow!("invalid value '{raw}' for {flag}: {e}"))
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut out = Args {
        config_path: None,
        rows: None,
        limit: None,
        page_rows: None,
        seed: None,
    };
    let mut idx = 1usize;
    while let Some(arg) = args.get(idx) {
        let value = args.get(idx + 1);
        match arg.as_str() {
            "--config" | "-c" => {
                out.config_path = Some(parse_value::<String>(arg, value)?);
            }
            "--rows" => out.rows = Some(parse_value(arg, value)?),
            "--limit" | "-k" => out.limit = Some(parse_value(arg, value)?),
            "--page-rows" => out.page_rows = Some(parse_value(arg, value)?),
            "--seed" => out.seed = Some(parse_value(arg, value)?),
            "--help" | "-h" => {
                usage();
                process::exit(0);
            }
            other => return Err(anyhow!("unknown arg: {other} (try --help)")),
        }
        idx += 2;
    }
    Ok(out)
}

fn workload_schema() -> SchemaRef {
    let tag = Arc::new(Field::new("item", DataType::Int32, true));
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("score", DataType::Float64, true),
        Field::new("name", DataType::Utf8, false),
        Field::new("tags", DataType::List(tag), true),
    ]))
}

fn generate_page(schema: &SchemaRef, rng: &mut StdRng, first_id: i64, rows: usize) -> Result<Chunk> {
    let ids: Vec<i64> = (first_id..first_id + rows as i64).collect();
    let mut scores = Float64Builder::with_capacity(rows);
    let mut tags = ListBuilder::new(Int32Builder::new());
    let mut names = Vec::with_capacity(rows);
    for id in &ids {
        if rng.gen_bool(0.05) {
            scores.append_null();
        } else {
            // Coarse values so that ties are common.
            scores.append_value(f64::from(rng.gen_range(0..500i32)) / 4.0);
        }
        names.push(format!("row-{id:06}"));
        if rng.gen_bool(0.1) {
            tags.append(false);
        } else {
            for _ in 0..rng.gen_range(0..4) {
                tags.values().append_value(rng.gen_range(-100..100));
            }
            tags.append(true);
        }
    }
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)) as ArrayRef,
        Arc::new(scores.finish()) as ArrayRef,
        Arc::new(StringArray::from(names)) as ArrayRef,
        Arc::new(tags.finish()) as ArrayRef,
    ];
    Ok(Chunk::try_new(schema.clone(), columns)?)
}

#[derive(Serialize)]
struct RunReport {
    rows: usize,
    top_count: i64,
    page_rows: usize,
    seed: u64,
    output_pages: usize,
    output_rows: usize,
    elapsed_ms: u128,
    tracker_peak_bytes: i64,
    root_peak_bytes: i64,
    status: TopNStatus,
}

fn run() -> Result<()> {
    let raw: Vec<String> = env::args().collect();
    let args = parse_args(&raw)?;
    let cfg = match args.config_path.as_deref() {
        Some(path) => topn_config::init_from_path(path)?,
        None => topn_config::init_from_env_or_default()?,
    };
    topn_logging::init_with_level(cfg.effective_log_filter());

    let rows = args.rows.unwrap_or(cfg.workload.rows);
    let top_count = args.limit.unwrap_or(cfg.workload.top_count);
    let page_rows = args.page_rows.unwrap_or(cfg.workload.page_rows).max(1);
    let seed = args.seed.unwrap_or(cfg.workload.seed);

    let root = match cfg.topn.memory_limit_bytes {
        Some(limit) => MemTracker::new_root_with_limit("topn-engine", limit),
        None => MemTracker::new_root("topn-engine"),
    };
    let tracker = MemTracker::new_child("TOP_N", &root);
    let accountant: Arc<dyn MemoryAccountant> = tracker.clone();
    let config = TopNConfig::new(
        top_count,
        vec![SortColumn::new(1, false, false), SortColumn::new(0, true, true)],
        vec![EncoderKind::SortableDefault, EncoderKind::SortableDefault],
    )
    .with_input_ordering(InputOrdering::NotSorted)
    .with_page_limits(cfg.topn.emit_page_byte_size_hint, cfg.topn.max_page_rows);
    let mut op = TopNOperator::try_new(config, accountant).context("build topn operator")?;

    info!(
        "running topn workload: rows={} limit={} page_rows={} seed={} memory_limit={}",
        rows,
        top_count,
        page_rows,
        seed,
        if root.has_limit() {
            root.limit().to_string()
        } else {
            "unlimited".to_string()
        }
    );
    let started = Instant::now();
    let schema = workload_schema();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut produced = 0usize;
    while produced < rows {
        let n = page_rows.min(rows - produced);
        let page = generate_page(&schema, &mut rng, produced as i64, n)?;
        op.add_input(&page)?;
        produced += n;
    }
    op.finish()?;

    let mut output_pages = 0usize;
    let mut output_rows = 0usize;
    while let Some(page) = op.get_output()? {
        output_pages += 1;
        output_rows += page.len();
    }
    let status = op.status();
    op.close();
    for child in root.children() {
        info!(
            "mem tracker {}: current={} peak={}",
            child.label(),
            child.current(),
            child.peak()
        );
    }

    let report = RunReport {
        rows,
        top_count,
        page_rows,
        seed,
        output_pages,
        output_rows,
        elapsed_ms: started.elapsed().as_millis(),
        tracker_peak_bytes: tracker.peak(),
        root_peak_bytes: root.peak(),
        status,
    };
    info!("topn workload done: {}", report.status);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("topn-engine failed: {err:#}");
        process::exit(1);
    }
}
