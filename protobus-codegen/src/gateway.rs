//! gRPC gateway emission
//!
//! The gateway implements the tonic-generated server trait for a service
//! and forwards every call onto the bus client, so a plain gRPC endpoint
//! can front services that only live on the bus. Bus errors surface as
//! `tonic::Status::internal` carrying the original error text.
//!
//! Generated code expects the consumer crate to build its messages with
//! `tonic-build` (so the `<service>_server` module exists alongside the
//! types) and to depend on `tonic`, `futures` and `async-stream`.

use heck::ToSnakeCase;

use crate::descriptor::{Mode, ServiceDescriptor};

const MAP_STATUS: &str = ".map_err(|err| ::tonic::Status::internal(err.to_string()))?";

/// Generate the `<Service>Gateway` for one service.
pub fn generate(service: &ServiceDescriptor) -> String {
    let name = &service.name;
    let server_mod = format!("{}_server", name.to_snake_case());
    let mut out = String::new();

    out.push_str(&format!(
        "/// gRPC front for `{name}`, forwarding onto the bus.\n"
    ));
    out.push_str(&format!("pub struct {name}Gateway {{\n"));
    out.push_str(&format!("    client: {name}Client,\n"));
    out.push_str("}\n\n");
    out.push_str(&format!("impl {name}Gateway {{\n"));
    out.push_str(&format!("    pub fn new(client: {name}Client) -> Self {{\n"));
    out.push_str("        Self { client }\n");
    out.push_str("    }\n");
    out.push_str("}\n\n");

    out.push_str("#[::tonic::async_trait]\n");
    out.push_str(&format!(
        "impl {server_mod}::{name} for {name}Gateway {{\n"
    ));

    let mut first = true;
    for method in &service.methods {
        if !first {
            out.push('\n');
        }
        first = false;
        match method.mode {
            Mode::Unary => out.push_str(&unary_method(method)),
            Mode::ClientStream => out.push_str(&client_stream_method(method)),
            Mode::ServerStream => out.push_str(&server_stream_method(method)),
        }
    }

    out.push_str("}\n\n");
    out
}

fn unary_method(method: &crate::descriptor::MethodDescriptor) -> String {
    let rust_name = &method.rust_name;
    let input = &method.input_type;
    let output = &method.output_type;
    let mut out = String::new();
    out.push_str(&format!("    async fn {rust_name}(\n"));
    out.push_str("        &self,\n");
    out.push_str(&format!("        request: ::tonic::Request<{input}>,\n"));
    out.push_str(&format!(
        "    ) -> ::std::result::Result<::tonic::Response<{output}>, ::tonic::Status> {{\n"
    ));
    out.push_str(&format!(
        "        let reply = self.client.{rust_name}(request.get_ref()).await{MAP_STATUS};\n"
    ));
    out.push_str("        Ok(::tonic::Response::new(reply))\n");
    out.push_str("    }\n");
    out
}

fn client_stream_method(method: &crate::descriptor::MethodDescriptor) -> String {
    let rust_name = &method.rust_name;
    let input = &method.input_type;
    let output = &method.output_type;
    let mut out = String::new();
    out.push_str(&format!("    async fn {rust_name}(\n"));
    out.push_str("        &self,\n");
    out.push_str(&format!(
        "        request: ::tonic::Request<::tonic::Streaming<{input}>>,\n"
    ));
    out.push_str(&format!(
        "    ) -> ::std::result::Result<::tonic::Response<{output}>, ::tonic::Status> {{\n"
    ));
    out.push_str("        let mut inbound = request.into_inner();\n");
    out.push_str(&format!(
        "        let stream = self.client.{rust_name}().await{MAP_STATUS};\n"
    ));
    out.push_str("        while let Some(item) = inbound.message().await? {\n");
    out.push_str(&format!("            stream.send(&item).await{MAP_STATUS};\n"));
    out.push_str("        }\n");
    out.push_str(&format!("        let reply = stream.done().await{MAP_STATUS};\n"));
    out.push_str("        Ok(::tonic::Response::new(reply))\n");
    out.push_str("    }\n");
    out
}

fn server_stream_method(method: &crate::descriptor::MethodDescriptor) -> String {
    let name = &method.name;
    let rust_name = &method.rust_name;
    let input = &method.input_type;
    let output = &method.output_type;
    let mut out = String::new();
    out.push_str(&format!(
        "    type {name}Stream = ::std::pin::Pin<Box<dyn ::futures::Stream<Item = ::std::result::Result<{output}, ::tonic::Status>> + Send>>;\n\n"
    ));
    out.push_str(&format!("    async fn {rust_name}(\n"));
    out.push_str("        &self,\n");
    out.push_str(&format!("        request: ::tonic::Request<{input}>,\n"));
    out.push_str(&format!(
        "    ) -> ::std::result::Result<::tonic::Response<Self::{name}Stream>, ::tonic::Status> {{\n"
    ));
    out.push_str(&format!(
        "        let mut stream = self.client.{rust_name}(request.get_ref()).await{MAP_STATUS};\n"
    ));
    out.push_str("        let outbound = ::async_stream::try_stream! {\n");
    out.push_str("            loop {\n");
    out.push_str("                match stream.receive().await {\n");
    out.push_str("                    Ok(Some(item)) => yield item,\n");
    out.push_str("                    Ok(None) => break,\n");
    out.push_str(
        "                    Err(err) => Err(::tonic::Status::internal(err.to_string()))?,\n",
    );
    out.push_str("                }\n");
    out.push_str("            }\n");
    out.push_str("        };\n");
    out.push_str(&format!(
        "        Ok(::tonic::Response::new(Box::pin(outbound) as Self::{name}Stream))\n"
    ));
    out.push_str("    }\n");
    out
}
