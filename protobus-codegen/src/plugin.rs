//! protoc plugin driver
//!
//! One `CodeGeneratorRequest` in, one `CodeGeneratorResponse` out. Any
//! generation fault fails the whole run through the response's `error`
//! field; protoc then writes nothing, so there is never partial output.

use prost_types::compiler::{code_generator_response, CodeGeneratorRequest, CodeGeneratorResponse};

use crate::generate::{self, Options, PathMode};
use crate::{Error, Result};

/// Parse the comma-separated plugin parameter string.
///
/// Recognized: `paths=import|source_relative`, `grpc`, `rest`,
/// `api_prefix=<prefix>`. A bad value for a recognized key is fatal;
/// unrecognized keys are ignored.
pub fn parse_options(parameter: &str) -> Result<Options> {
    let mut options = Options::default();
    for part in parameter.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some(("paths", "import")) => options.paths = PathMode::Import,
            Some(("paths", "source_relative")) => options.paths = PathMode::SourceRelative,
            Some(("paths", other)) => {
                return Err(Error::InvalidParameter(format!("paths={other}")))
            }
            Some(("api_prefix", prefix)) => options.api_prefix = prefix.to_string(),
            None if part == "grpc" => options.grpc = true,
            None if part == "rest" => options.rest = true,
            _ => tracing::debug!(parameter = part, "ignoring unrecognized parameter"),
        }
    }
    Ok(options)
}

/// Serve one code generation request.
pub fn run(request: &CodeGeneratorRequest) -> CodeGeneratorResponse {
    let mut response = CodeGeneratorResponse {
        supported_features: Some(code_generator_response::Feature::Proto3Optional as u64),
        ..Default::default()
    };
    match try_run(request) {
        Ok(files) => response.file = files,
        Err(err) => {
            tracing::error!(%err, "code generation failed");
            response.error = Some(err.to_string());
        }
    }
    response
}

fn try_run(request: &CodeGeneratorRequest) -> Result<Vec<code_generator_response::File>> {
    let options = parse_options(request.parameter())?;
    let mut out = Vec::new();
    for file in &request.proto_file {
        // proto_file carries the whole dependency closure; only the
        // explicitly requested files produce output.
        if !request.file_to_generate.iter().any(|n| n == file.name()) {
            continue;
        }
        for generated in generate::generate_file(file, &options)? {
            out.push(code_generator_response::File {
                name: Some(generated.name),
                content: Some(generated.content),
                ..Default::default()
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{FileDescriptorProto, MethodDescriptorProto, ServiceDescriptorProto};

    fn proto_file(name: &str, package: Option<&str>) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            package: package.map(str::to_string),
            service: vec![ServiceDescriptorProto {
                name: Some("OrderService".to_string()),
                method: vec![MethodDescriptorProto {
                    name: Some("GetOrder".to_string()),
                    input_type: Some(format!(".{}.GetOrderRequest", package.unwrap_or(""))),
                    output_type: Some(format!(".{}.GetOrderResponse", package.unwrap_or(""))),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn request(parameter: &str) -> CodeGeneratorRequest {
        CodeGeneratorRequest {
            file_to_generate: vec!["orders.proto".to_string()],
            parameter: Some(parameter.to_string()),
            proto_file: vec![
                proto_file("orders.proto", Some("orders.v1")),
                // A dependency that must not produce output.
                proto_file("dep.proto", Some("dep.v1")),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn defaults_and_toggles() {
        let options = parse_options("").unwrap();
        assert_eq!(options.paths, PathMode::Import);
        assert!(!options.grpc && !options.rest);
        assert_eq!(options.api_prefix, "/api");

        let options = parse_options("grpc,rest,paths=source_relative,api_prefix=/v2").unwrap();
        assert_eq!(options.paths, PathMode::SourceRelative);
        assert!(options.grpc && options.rest);
        assert_eq!(options.api_prefix, "/v2");
    }

    #[test]
    fn unknown_parameters_are_ignored() {
        assert!(parse_options("grpc,annotate_code,module=foo").is_ok());
    }

    #[test]
    fn bad_paths_value_is_fatal() {
        let err = parse_options("paths=absolute").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn only_requested_files_produce_output() {
        let response = run(&request("grpc,rest"));
        assert_eq!(response.error, None);
        let names: Vec<_> = response.file.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            vec!["orders.protobus.rs", "orders.gateway.rs", "orders.rest.rs"]
        );
    }

    #[test]
    fn generation_faults_fail_the_whole_run() {
        let mut req = request("");
        req.proto_file[0].package = None;
        let response = run(&req);
        assert!(response.error.unwrap().contains("missing package"));
        assert!(response.file.is_empty());
    }

    #[test]
    fn invalid_parameter_fails_the_whole_run() {
        let response = run(&request("paths=weird"));
        assert!(response.error.unwrap().contains("invalid parameter"));
    }

    #[test]
    fn responses_are_deterministic() {
        let req = request("grpc,rest");
        assert_eq!(run(&req), run(&req));
    }
}
