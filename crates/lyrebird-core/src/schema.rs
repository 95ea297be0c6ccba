//! Method schemas compiled at registration time from base64-encoded
//! `.proto` sources, and the JSON view of dynamic messages used by
//! predicates and templates.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, SerializeOptions};
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};
use protox::Compiler;
use serde_json::Value;

use crate::error::{LyrebirdError, LyrebirdResult};
use crate::method::MethodDescription;

/// Request and response descriptors for one mocked method.
#[derive(Debug, Clone)]
pub struct MethodSchema {
    pub request: MessageDescriptor,
    pub response: MessageDescriptor,
}

impl MethodSchema {
    /// Compiles the description's codecs and resolves its message classes.
    pub fn compile(method: &MethodDescription) -> LyrebirdResult<Self> {
        let pool = compile_pool(&[&method.request_codecs, &method.response_codecs])?;
        Ok(Self {
            request: resolve_message(&pool, &method.request_class)?,
            response: resolve_message(&pool, &method.response_class)?,
        })
    }
}

/// Serves `.proto` sources to the compiler from memory, with the
/// well-known google imports chained behind them.
#[derive(Debug)]
struct SourceSet {
    files: HashMap<String, String>,
}

impl FileResolver for SourceSet {
    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        match self.files.get(name) {
            Some(source) => File::from_source(name, source),
            None => Err(protox::Error::file_not_found(name)),
        }
    }
}

fn compile_pool(codecs: &[&str]) -> LyrebirdResult<DescriptorPool> {
    let mut files = HashMap::new();
    let mut names = Vec::new();
    let mut seen = Vec::new();
    for codec in codecs {
        let bytes = B64
            .decode(codec.trim())
            .map_err(|err| LyrebirdError::ProtoCompile(format!("invalid base64 codec: {err}")))?;
        let source = String::from_utf8(bytes)
            .map_err(|err| LyrebirdError::ProtoCompile(format!("codec is not utf-8: {err}")))?;
        if seen.contains(&source) {
            continue;
        }
        let name = format!("codec{}.proto", seen.len());
        files.insert(name.clone(), source.clone());
        names.push(name);
        seen.push(source);
    }

    let mut resolver = ChainFileResolver::new();
    resolver.add(SourceSet { files });
    resolver.add(GoogleFileResolver::new());

    let mut compiler = Compiler::with_file_resolver(resolver);
    compiler.include_imports(true);
    for name in &names {
        compiler
            .open_file(name)
            .map_err(|err| LyrebirdError::ProtoCompile(err.to_string()))?;
    }
    DescriptorPool::from_file_descriptor_set(compiler.file_descriptor_set())
        .map_err(|err| LyrebirdError::ProtoCompile(err.to_string()))
}

/// Looks a message class up by fully-qualified name first, then by bare
/// name across every package in the pool.
fn resolve_message(pool: &DescriptorPool, class: &str) -> LyrebirdResult<MessageDescriptor> {
    if let Some(found) = pool.get_message_by_name(class) {
        return Ok(found);
    }
    let mut found = pool.all_messages().filter(|m| m.name() == class);
    match (found.next(), found.next()) {
        (Some(message), None) => Ok(message),
        (Some(_), Some(_)) => Err(LyrebirdError::AmbiguousMessageClass(class.to_string())),
        (None, _) => Err(LyrebirdError::UnknownMessageClass(class.to_string())),
    }
}

/// JSON view of a decoded message, keyed by proto field names
/// (`instrument_id`, not `instrumentId`) with unset fields present at
/// their defaults. Predicates and `${req.*}` references address this view.
pub fn message_to_value(message: &DynamicMessage) -> LyrebirdResult<Value> {
    let options = SerializeOptions::new()
        .use_proto_field_name(true)
        .skip_default_fields(false);
    message
        .serialize_with_options(serde_json::value::Serializer, &options)
        .map_err(|err| LyrebirdError::Conversion(err.to_string()))
}

/// Builds a message of `descriptor`'s type from rendered JSON. Fields
/// unknown to the response class are an error, not silently dropped.
pub fn value_to_message(
    descriptor: MessageDescriptor,
    value: &Value,
) -> LyrebirdResult<DynamicMessage> {
    DynamicMessage::deserialize(descriptor, value.clone())
        .map_err(|err| LyrebirdError::Conversion(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::ConnectionType;
    use serde_json::json;

    const TEST_PROTO: &str = r#"
syntax = "proto3";

package market_data;

service OTCMarketDataService {
  rpc PricesUnary(PricesRequest) returns (PricesResponse);
}

message PricesRequest {
  string instrument_id = 1;
  string instrument_id_kind = 2;
}

message PricesResponse {
  string code = 1;
  string instrument_id = 2;
  string tracking_id = 3;
}
"#;

    fn description() -> MethodDescription {
        let codec = B64.encode(TEST_PROTO);
        MethodDescription {
            id: "md-1".to_string(),
            description: None,
            service: "beta".to_string(),
            method_name: "market_data.OTCMarketDataService/PricesUnary".to_string(),
            connection_type: ConnectionType::Unary,
            proxy_url: None,
            request_class: "PricesRequest".to_string(),
            response_class: "market_data.PricesResponse".to_string(),
            request_codecs: codec.clone(),
            response_codecs: codec,
            created: 0,
        }
    }

    #[test]
    fn compiles_and_resolves_bare_and_qualified_names() {
        let schema = MethodSchema::compile(&description()).unwrap();
        assert_eq!(schema.request.full_name(), "market_data.PricesRequest");
        assert_eq!(schema.response.full_name(), "market_data.PricesResponse");
    }

    #[test]
    fn unknown_class_is_reported() {
        let mut md = description();
        md.request_class = "NoSuchMessage".to_string();
        assert!(matches!(
            MethodSchema::compile(&md),
            Err(LyrebirdError::UnknownMessageClass(_))
        ));
    }

    #[test]
    fn invalid_base64_is_reported() {
        let mut md = description();
        md.request_codecs = "%%%not-base64%%%".to_string();
        assert!(matches!(MethodSchema::compile(&md), Err(LyrebirdError::ProtoCompile(_))));
    }

    #[test]
    fn invalid_proto_source_is_reported() {
        let mut md = description();
        md.request_codecs = B64.encode("message Broken {");
        assert!(matches!(MethodSchema::compile(&md), Err(LyrebirdError::ProtoCompile(_))));
    }

    #[test]
    fn value_round_trip_uses_proto_field_names() {
        let schema = MethodSchema::compile(&description()).unwrap();
        let message = value_to_message(
            schema.request.clone(),
            &json!({"instrument_id": "id_1", "instrument_id_kind": "ID_1"}),
        )
        .unwrap();
        let value = message_to_value(&message).unwrap();
        assert_eq!(value["instrument_id"], json!("id_1"));
        assert_eq!(value["instrument_id_kind"], json!("ID_1"));
    }

    #[test]
    fn unset_fields_appear_at_their_defaults() {
        let schema = MethodSchema::compile(&description()).unwrap();
        let message = value_to_message(schema.request.clone(), &json!({})).unwrap();
        let value = message_to_value(&message).unwrap();
        assert_eq!(value, json!({"instrument_id": "", "instrument_id_kind": ""}));
    }

    #[test]
    fn camel_case_input_is_accepted() {
        // proto3 JSON readers accept both namings; the canonical view
        // normalizes back to proto field names.
        let schema = MethodSchema::compile(&description()).unwrap();
        let message =
            value_to_message(schema.request.clone(), &json!({"instrumentId": "id_1"})).unwrap();
        let value = message_to_value(&message).unwrap();
        assert_eq!(value["instrument_id"], json!("id_1"));
    }

    #[test]
    fn unknown_response_fields_are_rejected() {
        let schema = MethodSchema::compile(&description()).unwrap();
        let err = value_to_message(
            schema.response.clone(),
            &json!({"code": "OK", "no_such_field": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, LyrebirdError::Conversion(_)));
    }

    #[test]
    fn identical_codecs_compile_once() {
        // request and response codecs routinely carry the same file.
        let schema = MethodSchema::compile(&description()).unwrap();
        assert_eq!(
            schema.request.parent_pool().files().count(),
            1,
            "duplicate codec source must not register twice"
        );
    }
}
