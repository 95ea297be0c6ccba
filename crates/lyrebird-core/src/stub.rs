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

//! Stub model and the in-memory stub store.
//!
//! Scope semantics:
//! - `persistent` stubs serve forever,
//! - `countdown` stubs serve exactly `times` calls,
//! - `ephemeral` stubs serve exactly one call.
//!
//! Consumption is atomic per stub: a slot that reaches zero is removed
//! from the store and never serves again, no matter how many callers
//! raced on it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LyrebirdError, LyrebirdResult};
use crate::predicate::{self, PredicateSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StubScope {
    Ephemeral,
    Countdown,
    Persistent,
}

impl StubScope {
    /// Selection priority; lower wins. Countdown stubs shadow ephemeral
    /// ones, persistent stubs are the fallback.
    pub fn priority(self) -> u8 {
        match self {
            Self::Countdown => 0,
            Self::Ephemeral => 1,
            Self::Persistent => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Fill,
    FillStream,
    Repeat,
    NoBody,
}

/// What a stub answers with once it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    pub mode: ResponseMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_delay: Option<String>,
}

impl ResponseSpec {
    pub fn validate(&self) -> LyrebirdResult<()> {
        match self.mode {
            ResponseMode::Fill => require_object_data(self.data.as_ref(), "fill")?,
            ResponseMode::FillStream => match &self.data {
                Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(LyrebirdError::InvalidArgument(
                        "fill_stream response data must be an array".into(),
                    ))
                }
                None => {
                    return Err(LyrebirdError::InvalidArgument(
                        "fill_stream response requires data".into(),
                    ))
                }
            },
            ResponseMode::Repeat => {
                require_object_data(self.data.as_ref(), "repeat")?;
                if self.repeats.unwrap_or(0) == 0 {
                    return Err(LyrebirdError::InvalidArgument(
                        "repeat response requires repeats >= 1".into(),
                    ));
                }
            }
            ResponseMode::NoBody => {
                if self.data.is_some() {
                    return Err(LyrebirdError::InvalidArgument(
                        "no_body response takes no data".into(),
                    ));
                }
            }
        }
        if self.mode != ResponseMode::Repeat && self.repeats.is_some() {
            return Err(LyrebirdError::InvalidArgument(
                "repeats is only valid for repeat responses".into(),
            ));
        }
        self.delay()?;
        Ok(())
    }

    /// Parsed inter-message delay, e.g. `"500ms"` or `"1s"`.
    pub fn delay(&self) -> LyrebirdResult<Option<std::time::Duration>> {
        match &self.stream_delay {
            None => Ok(None),
            Some(raw) => humantime::parse_duration(raw)
                .map(Some)
                .map_err(|err| LyrebirdError::InvalidDelay(format!("{raw:?}: {err}"))),
        }
    }
}

fn require_object_data(data: Option<&Value>, mode: &str) -> LyrebirdResult<()> {
    match data {
        Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(LyrebirdError::InvalidArgument(format!(
            "{mode} response data must be an object"
        ))),
        None => Err(LyrebirdError::InvalidArgument(format!(
            "{mode} response requires data"
        ))),
    }
}

/// A mock rule attached to one method description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stub {
    pub id: String,
    pub method_description_id: String,
    pub name: String,
    pub scope: StubScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<u32>,
    pub response: ResponseSpec,
    #[serde(default, skip_serializing_if = "PredicateSet::is_empty")]
    pub request_predicates: PredicateSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub created: u64,
}

impl Stub {
    pub fn validate(&self) -> LyrebirdResult<()> {
        if self.name.is_empty() {
            return Err(LyrebirdError::InvalidArgument("stub name must not be empty".into()));
        }
        match self.scope {
            StubScope::Countdown => {
                if self.times == Some(0) {
                    return Err(LyrebirdError::InvalidArgument("times must be at least 1".into()));
                }
            }
            StubScope::Ephemeral | StubScope::Persistent => {
                if self.times.is_some() {
                    return Err(LyrebirdError::InvalidArgument(
                        "times is only valid for countdown scope".into(),
                    ));
                }
            }
        }
        self.response.validate()?;
        predicate::validate_set(&self.request_predicates)?;
        Ok(())
    }

    /// Remaining-call budget implied by the scope. `None` means unlimited.
    pub fn budget(&self) -> Option<u32> {
        match self.scope {
            StubScope::Persistent => None,
            StubScope::Countdown => Some(self.times.unwrap_or(1)),
            StubScope::Ephemeral => Some(1),
        }
    }
}

/// A stored stub plus its live countdown state.
#[derive(Debug)]
pub struct StubSlot {
    stub: Stub,
    seq: u64,
    remaining: Mutex<Option<u32>>,
}

impl StubSlot {
    fn new(stub: Stub, seq: u64) -> Self {
        let remaining = Mutex::new(stub.budget());
        Self { stub, seq, remaining }
    }

    pub fn stub(&self) -> &Stub {
        &self.stub
    }

    /// Insertion order; later slots shadow earlier ones of the same scope.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn remaining(&self) -> Option<u32> {
        *self.remaining.lock()
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(*self.remaining.lock(), Some(0))
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    by_method: HashMap<String, Vec<Arc<StubSlot>>>,
    by_id: HashMap<String, Arc<StubSlot>>,
    next_seq: u64,
}

/// Shared registry of live stubs, keyed by stub id and method description id.
#[derive(Debug, Default)]
pub struct StubStore {
    inner: Mutex<StoreInner>,
}

impl StubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stub: Stub) -> Arc<StubSlot> {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let slot = Arc::new(StubSlot::new(stub, inner.next_seq));
        inner
            .by_method
            .entry(slot.stub.method_description_id.clone())
            .or_default()
            .push(slot.clone());
        inner.by_id.insert(slot.stub.id.clone(), slot.clone());
        slot
    }

    pub fn get(&self, id: &str) -> Option<Arc<StubSlot>> {
        self.inner.lock().by_id.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<StubSlot>> {
        let mut inner = self.inner.lock();
        let slot = inner.by_id.remove(id)?;
        if let Some(slots) = inner.by_method.get_mut(&slot.stub.method_description_id) {
            slots.retain(|s| s.stub.id != slot.stub.id);
            if slots.is_empty() {
                inner.by_method.remove(&slot.stub.method_description_id);
            }
        }
        Some(slot)
    }

    pub fn all(&self) -> Vec<Arc<StubSlot>> {
        let inner = self.inner.lock();
        let mut slots: Vec<_> = inner.by_id.values().cloned().collect();
        slots.sort_by_key(|s| s.seq);
        slots
    }

    pub fn for_method(&self, method_id: &str) -> Vec<Arc<StubSlot>> {
        let inner = self.inner.lock();
        let mut slots = inner.by_method.get(method_id).cloned().unwrap_or_default();
        slots.sort_by_key(|s| s.seq);
        slots
    }

    /// Non-exhausted stubs for a method, ready for match selection.
    pub fn candidates(&self, method_id: &str) -> Vec<Arc<StubSlot>> {
        self.for_method(method_id)
            .into_iter()
            .filter(|slot| !slot.is_exhausted())
            .collect()
    }

    pub fn has_stubs_for(&self, method_id: &str) -> bool {
        self.inner
            .lock()
            .by_method
            .get(method_id)
            .is_some_and(|slots| !slots.is_empty())
    }

    /// Burns one call from the slot's budget.
    ///
    /// `Spent` means a concurrent caller got the last charge first and
    /// selection must re-run. A slot that hits zero here is removed
    /// from the store.
    pub fn try_consume(&self, slot: &Arc<StubSlot>) -> Charge {
        let drained = {
            let mut remaining = slot.remaining.lock();
            match *remaining {
                None => return Charge::Served,
                Some(0) => return Charge::Spent,
                Some(n) => {
                    *remaining = Some(n - 1);
                    n == 1
                }
            }
        };
        if drained {
            self.remove(&slot.stub.id);
            Charge::Drained
        } else {
            Charge::Served
        }
    }
}

/// Outcome of charging one call against a slot's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
    /// Served with budget to spare; persistent slots always land here.
    Served,
    /// Served the final call and removed the slot from the store.
    Drained,
    /// Nothing left to charge; the slot was drained concurrently.
    Spent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::PredicateSet;

    fn stub(id: &str, scope: StubScope, times: Option<u32>) -> Stub {
        Stub {
            id: id.to_string(),
            method_description_id: "md-1".to_string(),
            name: format!("stub {id}"),
            scope,
            times,
            response: ResponseSpec {
                mode: ResponseMode::Fill,
                data: Some(serde_json::json!({"code": "OK"})),
                repeats: None,
                stream_delay: None,
            },
            request_predicates: PredicateSet::new(),
            state: None,
            seed: None,
            persist: None,
            labels: Vec::new(),
            created: 0,
        }
    }

    #[test]
    fn scope_wire_names() {
        assert_eq!(serde_json::to_string(&StubScope::Countdown).unwrap(), "\"countdown\"");
        let scope: StubScope = serde_json::from_str("\"ephemeral\"").unwrap();
        assert_eq!(scope, StubScope::Ephemeral);
    }

    #[test]
    fn budget_by_scope() {
        assert_eq!(stub("a", StubScope::Persistent, None).budget(), None);
        assert_eq!(stub("b", StubScope::Countdown, Some(4)).budget(), Some(4));
        assert_eq!(stub("c", StubScope::Countdown, None).budget(), Some(1));
        assert_eq!(stub("d", StubScope::Ephemeral, None).budget(), Some(1));
    }

    #[test]
    fn countdown_zero_times_rejected() {
        assert!(stub("a", StubScope::Countdown, Some(0)).validate().is_err());
        stub("b", StubScope::Countdown, Some(1)).validate().unwrap();
    }

    #[test]
    fn times_rejected_outside_countdown() {
        assert!(stub("a", StubScope::Persistent, Some(2)).validate().is_err());
        assert!(stub("b", StubScope::Ephemeral, Some(2)).validate().is_err());
    }

    #[test]
    fn repeat_requires_repeats() {
        let mut s = stub("a", StubScope::Persistent, None);
        s.response.mode = ResponseMode::Repeat;
        assert!(s.validate().is_err());
        s.response.repeats = Some(3);
        s.validate().unwrap();
    }

    #[test]
    fn fill_stream_requires_array_data() {
        let mut s = stub("a", StubScope::Persistent, None);
        s.response.mode = ResponseMode::FillStream;
        s.response.data = Some(serde_json::json!({"code": "OK"}));
        assert!(s.validate().is_err());
        s.response.data = Some(serde_json::json!([{"code": "OK"}]));
        s.validate().unwrap();
    }

    #[test]
    fn fill_requires_object_data() {
        let mut s = stub("a", StubScope::Persistent, None);
        s.response.data = Some(serde_json::json!(["not", "an", "object"]));
        assert!(s.validate().is_err());
        s.response.data = None;
        assert!(s.validate().is_err());
    }

    #[test]
    fn no_body_rejects_data() {
        let mut s = stub("a", StubScope::Persistent, None);
        s.response.mode = ResponseMode::NoBody;
        assert!(s.validate().is_err());
        s.response.data = None;
        s.validate().unwrap();
    }

    #[test]
    fn repeats_rejected_outside_repeat_mode() {
        let mut s = stub("a", StubScope::Persistent, None);
        s.response.repeats = Some(2);
        assert!(s.validate().is_err());
    }

    #[test]
    fn bad_delay_rejected() {
        let mut s = stub("a", StubScope::Persistent, None);
        s.response.stream_delay = Some("sideways".to_string());
        assert!(s.validate().is_err());
        s.response.stream_delay = Some("500ms".to_string());
        s.validate().unwrap();
    }

    #[test]
    fn consume_drains_countdown_and_removes_slot() {
        let store = StubStore::new();
        let slot = store.insert(stub("a", StubScope::Countdown, Some(2)));
        assert_eq!(store.try_consume(&slot), Charge::Served);
        assert_eq!(slot.remaining(), Some(1));
        assert_eq!(store.try_consume(&slot), Charge::Drained);
        assert!(slot.is_exhausted());
        assert!(store.get("a").is_none());
        assert_eq!(store.try_consume(&slot), Charge::Spent);
    }

    #[test]
    fn persistent_never_drains() {
        let store = StubStore::new();
        let slot = store.insert(stub("a", StubScope::Persistent, None));
        for _ in 0..100 {
            assert_eq!(store.try_consume(&slot), Charge::Served);
        }
        assert!(store.get("a").is_some());
    }

    #[test]
    fn concurrent_consumption_is_exact() {
        let store = Arc::new(StubStore::new());
        let slot = store.insert(stub("a", StubScope::Countdown, Some(16)));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            let slot = slot.clone();
            handles.push(std::thread::spawn(move || store.try_consume(&slot)));
        }
        let charges: Vec<Charge> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        let served = charges.iter().filter(|c| **c != Charge::Spent).count();
        let drained = charges.iter().filter(|c| **c == Charge::Drained).count();
        assert_eq!(served, 16);
        assert_eq!(drained, 1);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn remove_detaches_stub_from_method_index() {
        let store = StubStore::new();
        store.insert(stub("a", StubScope::Persistent, None));
        store.insert(stub("b", StubScope::Persistent, None));
        store.remove("a");
        assert!(store.has_stubs_for("md-1"));
        store.remove("b");
        assert!(!store.has_stubs_for("md-1"));
        assert!(store.all().is_empty());
    }
}
