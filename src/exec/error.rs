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
//! Error taxonomy for the execution layer.

use arrow::error::ArrowError;

use crate::runtime::mem_tracker::MemoryLimitExceeded;

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Invalid operator construction parameters. Surfaces as a planning bug.
    #[error("invalid topn configuration: {0}")]
    Config(String),

    /// The memory accountant refused a reservation. Fatal for the operator.
    #[error(transparent)]
    MemoryLimitExceeded(#[from] MemoryLimitExceeded),

    /// The caller drove the operator state machine out of order.
    #[error("operator precondition violated: {0}")]
    Precondition(String),

    /// An input page does not match the shape agreed at construction.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Broken internal invariant, e.g. an undecodable retained row payload.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

impl ExecError {
    pub fn is_memory_limit_exceeded(&self) -> bool {
        matches!(self, ExecError::MemoryLimitExceeded(_))
    }
}
