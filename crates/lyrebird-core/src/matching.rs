//! Stub selection and the match-render-consume cycle.

use std::cmp::Reverse;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{LyrebirdError, LyrebirdResult};
use crate::predicate;
use crate::render::{self, OutputShape, RenderedResponse};
use crate::stub::{Charge, StubSlot, StubStore};

/// Picks the stub that serves this payload, if any.
///
/// Candidates are ranked by scope priority (countdown, then ephemeral,
/// then persistent) and, within a scope, newest first. The first stub
/// whose predicates accept the payload wins.
pub fn select(candidates: &[Arc<StubSlot>], payload: &Value) -> Option<Arc<StubSlot>> {
    let mut ordered: Vec<&Arc<StubSlot>> = candidates.iter().collect();
    ordered.sort_by_key(|slot| (slot.stub().scope.priority(), Reverse(slot.seq())));
    ordered
        .into_iter()
        .find(|slot| predicate::matches(&slot.stub().request_predicates, payload))
        .cloned()
}

/// One successful dispatch: the winning stub, its rendered response,
/// and whether this call spent the stub's last charge.
#[derive(Debug)]
pub struct Resolution {
    pub slot: Arc<StubSlot>,
    pub rendered: RenderedResponse,
    pub drained: bool,
}

/// Runs one dispatch: select a stub, render its response, then burn one
/// call from its budget.
///
/// The budget is only charged after a successful render, so a stub that
/// cannot legally answer (for example a stream response on a unary
/// method) fails identically on every call and never drains. When a
/// concurrent caller drains the selected stub first, selection re-runs
/// against the remaining candidates.
pub fn resolve(
    store: &StubStore,
    method_id: &str,
    method_name: &str,
    payload: &Value,
    shape: OutputShape,
) -> LyrebirdResult<Resolution> {
    loop {
        let candidates = store.candidates(method_id);
        let Some(slot) = select(&candidates, payload) else {
            return Err(LyrebirdError::NoStubFound(method_name.to_string()));
        };
        let rendered = render::render(&slot.stub().response, payload, shape)?;
        match store.try_consume(&slot) {
            // Lost the race for the last charge; pick again without it.
            Charge::Spent => continue,
            charge => {
                return Ok(Resolution {
                    slot,
                    rendered,
                    drained: charge == Charge::Drained,
                })
            }
        }
    }
}
