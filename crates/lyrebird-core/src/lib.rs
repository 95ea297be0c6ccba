// Copyright [2026] [Lyrebird Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Lyrebird Contributors
// SPDX-License-Identifier: Apache-2.0

//! lyrebird-core
//!
//! Engine of the Lyrebird gRPC mock server:
//! - method descriptions with runtime-compiled protobuf schemas
//! - stub store with ephemeral / countdown / persistent scopes
//! - predicate matching over decoded request payloads
//! - `${req.*}` template interpolation and response rendering

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod error;
pub mod matching;
pub mod method;
pub mod predicate;
pub mod render;
pub mod schema;
pub mod stub;
pub mod template;

pub use crate::error::{LyrebirdError, LyrebirdResult};
pub use crate::method::{ConnectionType, MethodDescription, Service};
pub use crate::render::{OutputShape, RenderedResponse};
pub use crate::schema::MethodSchema;
pub use crate::stub::{Charge, ResponseMode, ResponseSpec, Stub, StubScope, StubSlot, StubStore};
