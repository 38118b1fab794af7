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
//! TopN processor: bounded top-K row selection over streaming pages.
//!
//! Responsibilities:
//! - Builds a composite binary key per input row and offers it to a bounded queue.
//! - Serializes admitted rows into the payload store and drops evicted ones.
//! - On finishing, drains the queue once and emits sorted pages on demand.
//! - Charges every retained row and every output page to the memory accountant and
//!   fails the whole operation when a reservation is refused.
//!
//! Key exported interfaces:
//! - Types: `TopNConfig`, `TopNOperator`, `TopNProcessorFactory`.

use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use serde::{Deserialize, Serialize};

use crate::exec::chunk::Chunk;
use crate::exec::error::{ExecError, Result};
use crate::exec::operators::topn::bounded_queue::{BoundedRowQueue, Offer};
use crate::exec::operators::topn::materializer::{PageLimits, RowMaterializer};
use crate::exec::operators::topn::payload::{
    PayloadSlot, PayloadWriter, RowPayloadStore, validate_payload_schema,
};
use crate::exec::operators::topn::status::TopNStatus;
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::exec::sortkey::{EncoderKind, RowKeyBuilder, SortKeySpec};
use crate::runtime::mem_tracker::{MemoryAccountant, Reservation};
use crate::topn_logging::{debug, info, warn};

pub const DEFAULT_EMIT_PAGE_BYTE_SIZE_HINT: usize = 1 << 20;
pub const DEFAULT_MAX_PAGE_ROWS: usize = 4096;

/// Caller guarantee about the order of the incoming stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputOrdering {
    /// Globally sorted by the leading sort column in its sort direction.
    Sorted,
    #[default]
    NotSorted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortColumn {
    pub channel: usize,
    #[serde(default = "default_true")]
    pub ascending: bool,
    #[serde(default = "default_true")]
    pub nulls_first: bool,
}

impl SortColumn {
    pub fn new(channel: usize, ascending: bool, nulls_first: bool) -> Self {
        Self {
            channel,
            ascending,
            nulls_first,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_emit_page_byte_size_hint() -> usize {
    DEFAULT_EMIT_PAGE_BYTE_SIZE_HINT
}

fn default_max_page_rows() -> usize {
    DEFAULT_MAX_PAGE_ROWS
}

/// Construction parameters of one TopN operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopNConfig {
    pub top_count: i64,
    pub sort_columns: Vec<SortColumn>,
    pub encoder_per_column: Vec<EncoderKind>,
    #[serde(default)]
    pub input_ordering: InputOrdering,
    #[serde(default = "default_emit_page_byte_size_hint")]
    pub emit_page_byte_size_hint: usize,
    #[serde(default = "default_max_page_rows")]
    pub max_page_rows: usize,
}

impl TopNConfig {
    pub fn new(
        top_count: i64,
        sort_columns: Vec<SortColumn>,
        encoder_per_column: Vec<EncoderKind>,
    ) -> Self {
        Self {
            top_count,
            sort_columns,
            encoder_per_column,
            input_ordering: InputOrdering::NotSorted,
            emit_page_byte_size_hint: DEFAULT_EMIT_PAGE_BYTE_SIZE_HINT,
            max_page_rows: DEFAULT_MAX_PAGE_ROWS,
        }
    }

    pub fn with_input_ordering(mut self, ordering: InputOrdering) -> Self {
        self.input_ordering = ordering;
        self
    }

    pub fn with_page_limits(mut self, byte_size_hint: usize, max_rows: usize) -> Self {
        self.emit_page_byte_size_hint = byte_size_hint;
        self.max_page_rows = max_rows;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_count < 0 {
            return Err(ExecError::Config(format!(
                "top_count must be non-negative, got {}",
                self.top_count
            )));
        }
        if self.sort_columns.is_empty() {
            return Err(ExecError::Config("sort_columns is empty".to_string()));
        }
        if self.sort_columns.len() != self.encoder_per_column.len() {
            return Err(ExecError::Config(format!(
                "{} sort columns but {} encoders",
                self.sort_columns.len(),
                self.encoder_per_column.len()
            )));
        }
        if self.emit_page_byte_size_hint == 0 {
            return Err(ExecError::Config(
                "emit_page_byte_size_hint must be positive".to_string(),
            ));
        }
        if self.max_page_rows == 0 {
            return Err(ExecError::Config("max_page_rows must be positive".to_string()));
        }
        Ok(())
    }

    fn key_specs(&self) -> Vec<SortKeySpec> {
        self.sort_columns
            .iter()
            .zip(&self.encoder_per_column)
            .map(|(col, encoder)| SortKeySpec {
                channel: col.channel,
                ascending: col.ascending,
                nulls_first: col.nulls_first,
                encoder: *encoder,
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopNState {
    Accepting,
    Finishing,
    Draining,
    Closed,
    Failed,
}

#[derive(Clone, Copy, Debug)]
struct RetainedRow {
    slot: PayloadSlot,
    leading_len: usize,
}

pub struct TopNOperator {
    name: String,
    top_count: usize,
    input_ordering: InputOrdering,
    limits: PageLimits,
    key_builder: RowKeyBuilder,
    accountant: Arc<dyn MemoryAccountant>,
    queue: BoundedRowQueue<RetainedRow>,
    store: RowPayloadStore,
    schema: Option<SchemaRef>,
    materializer: Option<RowMaterializer>,
    next_seq: u64,
    state: TopNState,
    status: TopNStatus,
    key_buf: Vec<u8>,
    payload_buf: Vec<u8>,
}

impl TopNOperator {
    pub fn try_new(config: TopNConfig, accountant: Arc<dyn MemoryAccountant>) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_validated("TOP_N".to_string(), &config, accountant))
    }

    fn from_validated(
        name: String,
        config: &TopNConfig,
        accountant: Arc<dyn MemoryAccountant>,
    ) -> Self {
        // validate() rejected negative counts.
        let top_count = usize::try_from(config.top_count).unwrap_or(0);
        Self {
            name,
            top_count,
            input_ordering: config.input_ordering,
            limits: PageLimits {
                byte_size_hint: config.emit_page_byte_size_hint,
                max_rows: config.max_page_rows,
            },
            key_builder: RowKeyBuilder::new(config.key_specs()),
            accountant,
            queue: BoundedRowQueue::new(top_count),
            store: RowPayloadStore::new(),
            schema: None,
            materializer: None,
            next_seq: 0,
            state: TopNState::Accepting,
            status: TopNStatus::default(),
            key_buf: Vec::new(),
            payload_buf: Vec::new(),
        }
    }

    pub fn state(&self) -> TopNState {
        self.state
    }

    pub fn status(&self) -> TopNStatus {
        self.status
    }

    pub fn top_count(&self) -> usize {
        self.top_count
    }

    /// Rows currently retained by the queue.
    pub fn retained_rows(&self) -> usize {
        self.queue.len()
    }

    /// Offer every row of `page`. The page is not referenced after return.
    pub fn add_input(&mut self, page: &Chunk) -> Result<()> {
        self.expect_state(TopNState::Accepting, "add_input")?;
        self.status.pages_received += 1;
        self.status.rows_received += page.len() as u64;
        self.status.bytes_received += page.logical_bytes() as u64;
        if page.is_empty() {
            return Ok(());
        }
        match self.accept_page(page) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn accept_page(&mut self, page: &Chunk) -> Result<()> {
        self.check_schema(page)?;
        let rows = page.len();
        if self.top_count == 0 {
            self.status.rows_rejected += rows as u64;
            return Ok(());
        }
        let keys = self.key_builder.bind(page)?;
        let writer = PayloadWriter::bind(page)?;
        let single_column = self.key_builder.columns().len() == 1;
        let sorted = self.input_ordering == InputOrdering::Sorted;

        for row in 0..rows {
            let seq = self.next_seq;
            self.next_seq += 1;
            let leading_len = keys.build_key(row, seq, &mut self.key_buf);
            if !self.queue.would_accept(&self.key_buf) {
                self.status.rows_rejected += 1;
                if sorted
                    && leading_worse_than_worst(
                        &self.queue,
                        &self.key_buf[..leading_len],
                        single_column,
                    )
                {
                    let skipped = (rows - row - 1) as u64;
                    self.status.rows_skipped += skipped;
                    self.next_seq += skipped;
                    break;
                }
                continue;
            }

            writer.write_row(row, &mut self.payload_buf);
            // Release the row being replaced before charging its successor.
            if self.queue.is_full()
                && let Some((_, worst)) = self.queue.worst()
            {
                let worst_slot = worst.slot;
                self.store.remove(worst_slot);
            }
            let reservation = Reservation::try_new(
                self.key_buf.len() + self.payload_buf.len(),
                Arc::clone(&self.accountant),
            )?;
            let slot = self.store.insert(self.payload_buf.clone(), reservation);
            match self
                .queue
                .offer(self.key_buf.clone(), RetainedRow { slot, leading_len })
            {
                Offer::Accepted { evicted: None } => {}
                Offer::Accepted { evicted: Some(_) } => self.status.rows_evicted += 1,
                Offer::RejectedWorseThanWorst => {
                    return Err(ExecError::Internal(
                        "queue rejected a row it agreed to accept".to_string(),
                    ));
                }
            }
            self.status.set_retained(self.retained_bytes());
        }
        Ok(())
    }

    fn check_schema(&mut self, page: &Chunk) -> Result<()> {
        let incoming = page.schema();
        match &self.schema {
            None => {
                validate_payload_schema(&incoming)?;
                self.schema = Some(incoming);
            }
            Some(schema) => {
                let same_shape = schema.fields().len() == incoming.fields().len()
                    && schema
                        .fields()
                        .iter()
                        .zip(incoming.fields().iter())
                        .all(|(a, b)| a.data_type() == b.data_type());
                if !same_shape {
                    return Err(ExecError::InvalidInput(format!(
                        "page schema {incoming:?} does not match {schema:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// No more input. Drains the queue into sorted order for output.
    pub fn finish(&mut self) -> Result<()> {
        self.expect_state(TopNState::Accepting, "finish")?;
        let queue = std::mem::replace(&mut self.queue, BoundedRowQueue::new(0));
        let ordered = queue.drain_sorted();
        let rows = ordered.len();
        let schema = self
            .schema
            .clone()
            .unwrap_or_else(|| Arc::new(Schema::empty()));
        self.materializer = Some(RowMaterializer::new(
            schema,
            ordered.into_iter().map(|(_, row)| row.slot),
            self.limits,
            Arc::clone(&self.accountant),
        ));
        self.state = TopNState::Finishing;
        debug!(
            "{} finishing: {} rows retained, {}",
            self.name, rows, self.status
        );
        Ok(())
    }

    /// Next sorted output page, or `None` once everything has been emitted.
    pub fn get_output(&mut self) -> Result<Option<Chunk>> {
        match self.state {
            TopNState::Finishing => {
                self.state = TopNState::Draining;
                debug!("{} draining", self.name);
            }
            TopNState::Draining => {}
            _ => return Err(self.precondition("get_output")),
        }
        let Some(materializer) = self.materializer.as_mut() else {
            return Err(self.fail(ExecError::Internal(
                "draining without a materializer".to_string(),
            )));
        };
        match materializer.next_page(&mut self.store) {
            Ok(Some(page)) => {
                self.status.pages_emitted += 1;
                self.status.rows_emitted += page.len() as u64;
                self.status.set_retained(self.retained_bytes());
                Ok(Some(page))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn is_finished(&self) -> bool {
        match self.state {
            TopNState::Closed => true,
            TopNState::Finishing | TopNState::Draining => self
                .materializer
                .as_ref()
                .is_none_or(RowMaterializer::is_exhausted),
            TopNState::Accepting | TopNState::Failed => false,
        }
    }

    /// Release everything. Valid from any state; later calls are no-ops.
    pub fn close(&mut self) {
        if self.state == TopNState::Closed {
            return;
        }
        self.release_all();
        self.state = TopNState::Closed;
        info!("{} closed: {}", self.name, self.status);
    }

    fn retained_bytes(&self) -> u64 {
        u64::try_from(self.store.reserved_bytes()).unwrap_or(0)
    }

    fn release_all(&mut self) {
        self.queue.clear();
        if let Some(materializer) = self.materializer.as_mut() {
            materializer.clear();
        }
        self.materializer = None;
        self.store.clear();
        self.status.set_retained(0);
    }

    fn fail(&mut self, err: ExecError) -> ExecError {
        self.release_all();
        self.state = TopNState::Failed;
        if err.is_memory_limit_exceeded() {
            warn!("{} failed on memory limit: {} ({})", self.name, err, self.status);
        } else {
            warn!("{} failed: {}", self.name, err);
        }
        err
    }

    fn expect_state(&self, expected: TopNState, call: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.precondition(call))
        }
    }

    fn precondition(&self, call: &str) -> ExecError {
        ExecError::Precondition(format!(
            "{} called on {} in state {:?}",
            call, self.name, self.state
        ))
    }
}

/// Sorted input only: whether no later row of the page can beat the worst
/// retained row. With one sort column an equal value loses on arrival order.
fn leading_worse_than_worst(
    queue: &BoundedRowQueue<RetainedRow>,
    leading: &[u8],
    single_column: bool,
) -> bool {
    if !queue.is_full() {
        return false;
    }
    let Some((worst_key, worst)) = queue.worst() else {
        return false;
    };
    let worst_leading = &worst_key[..worst.leading_len];
    match leading.cmp(worst_leading) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => single_column,
        std::cmp::Ordering::Less => false,
    }
}

impl Drop for TopNOperator {
    fn drop(&mut self) {
        self.close();
    }
}

impl Operator for TopNOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        TopNOperator::close(self);
        Ok(())
    }

    fn cancel(&mut self) {
        TopNOperator::close(self);
    }

    fn is_finished(&self) -> bool {
        TopNOperator::is_finished(self)
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        Some(self)
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        Some(self)
    }
}

impl ProcessorOperator for TopNOperator {
    fn need_input(&self) -> bool {
        self.state == TopNState::Accepting
    }

    fn has_output(&self) -> bool {
        matches!(self.state, TopNState::Finishing | TopNState::Draining)
            && !TopNOperator::is_finished(self)
    }

    fn push_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.add_input(&chunk)
    }

    fn pull_chunk(&mut self) -> Result<Option<Chunk>> {
        if !self.has_output() {
            return Ok(None);
        }
        self.get_output()
    }

    fn set_finishing(&mut self) -> Result<()> {
        self.finish()
    }
}

/// Factory for TopN processors. Configuration is validated once here.
pub struct TopNProcessorFactory {
    name: String,
    config: TopNConfig,
    accountant: Arc<dyn MemoryAccountant>,
}

impl TopNProcessorFactory {
    pub fn try_new(
        node_id: i32,
        config: TopNConfig,
        accountant: Arc<dyn MemoryAccountant>,
    ) -> Result<Self> {
        config.validate()?;
        let name = if node_id >= 0 {
            format!("TOP_N (id={node_id})")
        } else {
            "TOP_N".to_string()
        };
        Ok(Self {
            name,
            config,
            accountant,
        })
    }

    pub fn config(&self) -> &TopNConfig {
        &self.config
    }

    pub fn create_topn(&self, driver_id: i32) -> TopNOperator {
        TopNOperator::from_validated(
            format!("{} [driver={driver_id}]", self.name),
            &self.config,
            Arc::clone(&self.accountant),
        )
    }
}

impl OperatorFactory for TopNProcessorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, driver_id: i32) -> Box<dyn Operator> {
        Box::new(self.create_topn(driver_id))
    }
}
