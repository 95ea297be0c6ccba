//! Glue between the gRPC surface and the stub matcher: one decoded
//! inbound message in, one rendered response out, with counters and
//! logs on every outcome.

use prost_reflect::DynamicMessage;

use lyrebird_core::error::{LyrebirdError, LyrebirdResult};
use lyrebird_core::matching;
use lyrebird_core::render::{OutputShape, RenderedResponse};
use lyrebird_core::schema;

use crate::registry::{MethodEntry, MockState};

pub fn dispatch_message(
    state: &MockState,
    entry: &MethodEntry,
    request: &DynamicMessage,
) -> LyrebirdResult<RenderedResponse> {
    let payload = schema::message_to_value(request)?;
    let shape = OutputShape::for_connection(entry.method.connection_type);
    let method_name = &entry.method.method_name;
    match matching::resolve(
        &state.registry.stubs,
        &entry.method.id,
        method_name,
        &payload,
        shape,
    ) {
        Ok(resolution) => {
            state.telemetry.record_stub_hit(method_name);
            tracing::info!(
                method = %method_name,
                stub = %resolution.slot.stub().id,
                remaining = ?resolution.slot.remaining(),
                "stub matched"
            );
            if resolution.drained {
                state.telemetry.record_stub_exhausted(method_name);
                tracing::info!(
                    method = %method_name,
                    stub = %resolution.slot.stub().id,
                    "stub budget exhausted"
                );
            }
            Ok(resolution.rendered)
        }
        Err(err @ LyrebirdError::NoStubFound(_)) => {
            state.telemetry.record_stub_miss(method_name);
            tracing::info!(method = %method_name, "no stub matched");
            Err(err)
        }
        Err(err) => {
            state.telemetry.record_render_failure(method_name);
            tracing::warn!(method = %method_name, error = %err, "stub response failed to render");
            Err(err)
        }
    }
}
