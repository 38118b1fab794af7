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
//! Synchronous pipeline driver.
//!
//! Responsibilities:
//! - Pushes source pages through a chain of processor operators, forwarding
//!   each stage's output to the next stage.
//! - Propagates end-of-input with `set_finishing` stage by stage and collects
//!   the final stage's output.
//! - Closes every operator exactly once on success, failure, or drop.
//!
//! Current limitations:
//! - Runs on the calling thread without yielding. A stage that refuses input
//!   is reported as an error rather than blocking.

use crate::exec::chunk::Chunk;
use crate::exec::error::{ExecError, Result};
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::topn_logging::{debug, error};

pub struct PipelineDriver {
    driver_id: i32,
    operators: Vec<Box<dyn Operator>>,
    closed: bool,
}

impl PipelineDriver {
    pub fn new(driver_id: i32, operators: Vec<Box<dyn Operator>>) -> Self {
        Self {
            driver_id,
            operators,
            closed: false,
        }
    }

    pub fn driver_id(&self) -> i32 {
        self.driver_id
    }

    pub fn operators(&self) -> &[Box<dyn Operator>] {
        &self.operators
    }

    /// Feed every page of `source` through the chain and return the sink output.
    ///
    /// Operators are closed before returning, whatever the outcome.
    pub fn run<I>(&mut self, source: I) -> Result<Vec<Chunk>>
    where
        I: IntoIterator<Item = Chunk>,
    {
        if self.closed {
            return Err(ExecError::Precondition(format!(
                "driver {} already ran",
                self.driver_id
            )));
        }
        let result = self.run_inner(source);
        if let Err(err) = &result {
            error!(
                "driver {} failed: {}; cancelling {} operators",
                self.driver_id,
                err,
                self.operators.len()
            );
            for op in &mut self.operators {
                op.cancel();
            }
        }
        self.close_operators();
        result
    }

    fn run_inner<I>(&mut self, source: I) -> Result<Vec<Chunk>>
    where
        I: IntoIterator<Item = Chunk>,
    {
        for op in &mut self.operators {
            op.prepare()?;
        }
        let mut sink = Vec::new();
        for chunk in source {
            if chunk.is_empty() {
                continue;
            }
            self.push_through(0, vec![chunk], &mut sink)?;
        }
        for idx in 0..self.operators.len() {
            let outputs = {
                let proc = processor_mut(self.operators[idx].as_mut())?;
                proc.set_finishing()?;
                drain_output(proc)?
            };
            self.push_through(idx + 1, outputs, &mut sink)?;
        }
        debug!(
            "driver {} finished with {} output chunks",
            self.driver_id,
            sink.len()
        );
        Ok(sink)
    }

    fn push_through(
        &mut self,
        start: usize,
        mut batch: Vec<Chunk>,
        sink: &mut Vec<Chunk>,
    ) -> Result<()> {
        for op in self.operators.iter_mut().skip(start) {
            if batch.is_empty() {
                return Ok(());
            }
            let proc = processor_mut(op.as_mut())?;
            for chunk in batch.drain(..) {
                if !proc.need_input() {
                    return Err(ExecError::Precondition(format!(
                        "operator {} does not accept input",
                        proc.name()
                    )));
                }
                proc.push_chunk(chunk)?;
            }
            batch = drain_output(proc)?;
        }
        sink.extend(batch);
        Ok(())
    }

    fn close_operators(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for op in self.operators.iter_mut().rev() {
            if let Err(err) = op.close() {
                error!("operator close failed: {}: {}", op.name(), err);
            }
        }
    }
}

impl Drop for PipelineDriver {
    fn drop(&mut self) {
        self.close_operators();
    }
}

fn processor_mut(op: &mut dyn Operator) -> Result<&mut dyn ProcessorOperator> {
    let name = op.name().to_string();
    op.as_processor_mut()
        .ok_or_else(|| ExecError::Internal(format!("operator {name} is not a processor")))
}

fn drain_output(proc: &mut dyn ProcessorOperator) -> Result<Vec<Chunk>> {
    let mut out = Vec::new();
    while proc.has_output() {
        match proc.pull_chunk()? {
            Some(chunk) if !chunk.is_empty() => out.push(chunk),
            Some(_) => {}
            None => break,
        }
    }
    Ok(out)
}
