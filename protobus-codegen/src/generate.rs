//! File-level generation: which bindings to emit and what to call them
//!
//! Generation is a pure function of the file descriptor and options: the
//! same input always produces byte-identical output, so build systems can
//! cache and diff generated files.

use prost_types::FileDescriptorProto;

use crate::descriptor::ServiceDescriptor;
use crate::{gateway, native, rest, Error, Result};

/// How output file names relate to proto file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// Flatten to the proto's basename
    Import,
    /// Keep the proto's directory
    SourceRelative,
}

/// Generation options, usually parsed from the plugin parameter string.
#[derive(Debug, Clone)]
pub struct Options {
    pub paths: PathMode,
    /// Also emit the gRPC gateway binding
    pub grpc: bool,
    /// Also emit the HTTP/JSON gateway binding
    pub rest: bool,
    /// Route prefix for HTTP paths
    pub api_prefix: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            paths: PathMode::Import,
            grpc: false,
            rest: false,
            api_prefix: "/api".to_string(),
        }
    }
}

/// One generated output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub name: String,
    pub content: String,
}

const HEADER: &str = "// Generated by protoc-gen-protobus. Do not edit.\n";

/// Generate every enabled binding for one proto file. Files without
/// services produce nothing.
pub fn generate_file(
    file: &FileDescriptorProto,
    options: &Options,
) -> Result<Vec<GeneratedFile>> {
    if file.service.is_empty() {
        return Ok(Vec::new());
    }
    if file.name().is_empty() {
        return Err(Error::Configuration("proto file without a name".to_string()));
    }

    let services = file
        .service
        .iter()
        .map(|service| ServiceDescriptor::from_proto(file, service, &options.api_prefix))
        .collect::<Result<Vec<_>>>()?;

    let base = output_base(file.name(), options.paths);
    let mut files = vec![GeneratedFile {
        name: format!("{base}.protobus.rs"),
        content: render(&services, native::generate),
    }];
    if options.grpc {
        files.push(GeneratedFile {
            name: format!("{base}.gateway.rs"),
            content: render(&services, gateway::generate),
        });
    }
    if options.rest {
        files.push(GeneratedFile {
            name: format!("{base}.rest.rs"),
            content: render(&services, rest::generate),
        });
    }
    tracing::debug!(proto = file.name(), outputs = files.len(), "generated bindings");
    Ok(files)
}

fn render(services: &[ServiceDescriptor], emit: fn(&ServiceDescriptor) -> String) -> String {
    let mut out = String::from(HEADER);
    for service in services {
        out.push('\n');
        out.push_str(&emit(service));
    }
    let trimmed = out.trim_end();
    format!("{trimmed}\n")
}

fn output_base(proto_name: &str, mode: PathMode) -> String {
    let stem = proto_name.strip_suffix(".proto").unwrap_or(proto_name);
    match mode {
        PathMode::SourceRelative => stem.to_string(),
        PathMode::Import => stem.rsplit('/').next().unwrap_or(stem).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{MethodDescriptorProto, ServiceDescriptorProto};

    fn proto_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("orders/orders.proto".to_string()),
            package: Some("orders.v1".to_string()),
            service: vec![ServiceDescriptorProto {
                name: Some("OrderService".to_string()),
                method: vec![MethodDescriptorProto {
                    name: Some("GetOrder".to_string()),
                    input_type: Some(".orders.v1.GetOrderRequest".to_string()),
                    output_type: Some(".orders.v1.GetOrderResponse".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn import_mode_flattens_to_the_basename() {
        let files = generate_file(&proto_file(), &Options::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "orders.protobus.rs");
    }

    #[test]
    fn source_relative_mode_keeps_the_directory() {
        let options = Options {
            paths: PathMode::SourceRelative,
            ..Default::default()
        };
        let files = generate_file(&proto_file(), &options).unwrap();
        assert_eq!(files[0].name, "orders/orders.protobus.rs");
    }

    #[test]
    fn toggles_add_gateway_and_rest_outputs() {
        let options = Options {
            grpc: true,
            rest: true,
            ..Default::default()
        };
        let names: Vec<_> = generate_file(&proto_file(), &options)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "orders.protobus.rs",
                "orders.gateway.rs",
                "orders.rest.rs"
            ]
        );
    }

    #[test]
    fn files_without_services_are_skipped() {
        let file = FileDescriptorProto {
            name: Some("types.proto".to_string()),
            package: Some("orders.v1".to_string()),
            ..Default::default()
        };
        assert!(generate_file(&file, &Options::default()).unwrap().is_empty());
    }

    #[test]
    fn generation_is_deterministic() {
        let options = Options {
            grpc: true,
            rest: true,
            ..Default::default()
        };
        let first = generate_file(&proto_file(), &options).unwrap();
        let second = generate_file(&proto_file(), &options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn api_prefix_changes_emitted_routes() {
        let options = Options {
            rest: true,
            api_prefix: "/v2".to_string(),
            ..Default::default()
        };
        let files = generate_file(&proto_file(), &options).unwrap();
        let rest = files.iter().find(|f| f.name.ends_with(".rest.rs")).unwrap();
        assert!(rest.content.contains("/v2/orders.v1/OrderService/GetOrder"));
    }

    #[test]
    fn every_output_starts_with_the_generated_header() {
        let options = Options {
            grpc: true,
            rest: true,
            ..Default::default()
        };
        for file in generate_file(&proto_file(), &options).unwrap() {
            assert!(file.content.starts_with(HEADER));
            assert!(file.content.ends_with('\n'));
        }
    }
}
