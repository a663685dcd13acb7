//! Service and method descriptors distilled from protobuf file descriptors
//!
//! Emitters never touch `prost_types` directly; everything they need is
//! validated and resolved here first, so a descriptor that builds is a
//! descriptor that generates.

use heck::ToSnakeCase;
use prost_types::{FileDescriptorProto, MethodDescriptorProto, ServiceDescriptorProto};

use crate::{Error, Result};

/// Call shape of one RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unary,
    ClientStream,
    ServerStream,
}

/// One RPC method, with its types resolved to Rust paths relative to the
/// enclosing prost-generated module.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    /// Proto method name, e.g. `GetOrder`
    pub name: String,
    /// Rust method name, e.g. `get_order`
    pub rust_name: String,
    pub input_type: String,
    pub output_type: String,
    pub mode: Mode,
    /// HTTP route for the JSON gateway
    pub http_path: String,
}

/// One service of a proto file.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    /// Proto service name, e.g. `OrderService`
    pub name: String,
    /// Proto package; doubles as the subject namespace
    pub namespace: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Build a descriptor for `service`, validating everything the
    /// emitters rely on.
    pub fn from_proto(
        file: &FileDescriptorProto,
        service: &ServiceDescriptorProto,
        api_prefix: &str,
    ) -> Result<Self> {
        let file_name = file.name();
        let package = file.package();
        if package.is_empty() {
            return Err(Error::Configuration(format!(
                "{file_name}: missing package declaration"
            )));
        }
        let name = service.name().to_string();

        let mut methods = Vec::with_capacity(service.method.len());
        for method in &service.method {
            let descriptor = MethodDescriptor::from_proto(method, package, api_prefix, &name)?;
            if methods
                .iter()
                .any(|m: &MethodDescriptor| m.name == descriptor.name)
            {
                return Err(Error::Configuration(format!(
                    "{package}.{name}: duplicate method {}",
                    descriptor.name
                )));
            }
            methods.push(descriptor);
        }

        Ok(Self {
            name,
            namespace: package.to_string(),
            methods,
        })
    }

    /// Bus subject of a method in this service.
    pub fn subject(&self, method: &str) -> String {
        format!("{}/{}", self.namespace, method)
    }

    /// Subject of the service's built-in health check.
    pub fn health_subject(&self) -> String {
        format!("{}/{}HealthCheck", self.namespace, self.name)
    }
}

impl MethodDescriptor {
    fn from_proto(
        method: &MethodDescriptorProto,
        package: &str,
        api_prefix: &str,
        service: &str,
    ) -> Result<Self> {
        let name = method.name().to_string();
        let mode = match (method.client_streaming(), method.server_streaming()) {
            (false, false) => Mode::Unary,
            (true, false) => Mode::ClientStream,
            (false, true) => Mode::ServerStream,
            (true, true) => {
                return Err(Error::Configuration(format!(
                    "{package}.{service}.{name}: bidirectional streaming is not supported"
                )))
            }
        };

        Ok(Self {
            rust_name: name.to_snake_case(),
            input_type: resolve_type(method.input_type(), package, service, &name)?,
            output_type: resolve_type(method.output_type(), package, service, &name)?,
            http_path: format!("{api_prefix}/{package}/{service}/{name}"),
            name,
            mode,
        })
    }
}

/// Resolve a fully-qualified proto type name to a Rust path relative to
/// the module the generated bindings are included into. Only types from
/// the same package can be resolved that way; anything else is a
/// configuration fault.
fn resolve_type(proto_type: &str, package: &str, service: &str, method: &str) -> Result<String> {
    let local = proto_type
        .strip_prefix('.')
        .and_then(|t| t.strip_prefix(package))
        .and_then(|t| t.strip_prefix('.'))
        .ok_or_else(|| {
            Error::Configuration(format!(
                "{package}.{service}.{method}: type {proto_type} is not declared in package {package}"
            ))
        })?;

    // Nested messages live in snake_case modules named after their parent.
    let mut segments: Vec<&str> = local.split('.').collect();
    let type_name = segments
        .pop()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "{package}.{service}.{method}: malformed type name {proto_type}"
            ))
        })?;
    let mut path = segments
        .iter()
        .map(|s| s.to_snake_case())
        .collect::<Vec<_>>();
    path.push(type_name.to_string());
    Ok(path.join("::"))
}
