//! HTTP/JSON gateway emission
//!
//! One POST route per unary method, mounted on an axum `Router`. Bodies
//! are JSON renditions of the proto messages, so the consumer crate must
//! derive serde on its generated types. Streaming methods have no HTTP
//! shape here and are skipped.

use heck::ToSnakeCase;

use crate::descriptor::{Mode, ServiceDescriptor};

/// Generate the `<Service>Rest` router for one service.
pub fn generate(service: &ServiceDescriptor) -> String {
    let name = &service.name;
    let mut out = String::new();

    out.push_str(&format!(
        "/// HTTP/JSON front for `{name}` unary methods.\n"
    ));
    out.push_str("#[derive(Clone)]\n");
    out.push_str(&format!("pub struct {name}Rest {{\n"));
    out.push_str(&format!("    client: {name}Client,\n"));
    out.push_str("    bus_id: ::std::string::String,\n");
    out.push_str("}\n\n");

    out.push_str(&format!("impl {name}Rest {{\n"));
    out.push_str(&format!(
        "    pub fn new(client: {name}Client, bus_id: impl Into<::std::string::String>) -> Self {{\n"
    ));
    out.push_str("        Self { client, bus_id: bus_id.into() }\n");
    out.push_str("    }\n\n");

    out.push_str("    pub fn router(self) -> ::axum::Router {\n");
    out.push_str("        ::axum::Router::new()\n");
    for method in unary_methods(service) {
        let handler = handler_name(method);
        out.push_str(&format!(
            "            .route(\"{}\", ::axum::routing::post(Self::{handler}))\n",
            method.http_path
        ));
    }
    out.push_str("            .with_state(self)\n");
    out.push_str("    }\n");

    for method in unary_methods(service) {
        let handler = handler_name(method);
        let rust_name = &method.rust_name;
        let input = &method.input_type;
        out.push('\n');
        out.push_str(&format!("    async fn {handler}(\n"));
        out.push_str("        ::axum::extract::State(gateway): ::axum::extract::State<Self>,\n");
        out.push_str(&format!(
            "        ::axum::Json(input): ::axum::Json<{input}>,\n"
        ));
        out.push_str("    ) -> (::axum::http::StatusCode, ::std::string::String) {\n");
        out.push_str(&format!(
            "        let result = gateway.client.{rust_name}(&input).await;\n"
        ));
        out.push_str(
            "        let (status, body) = ::protobus::rest::encode_json_reply(result, &gateway.bus_id);\n",
        );
        out.push_str("        let status = ::axum::http::StatusCode::from_u16(status)\n");
        out.push_str("            .unwrap_or(::axum::http::StatusCode::INTERNAL_SERVER_ERROR);\n");
        out.push_str("        (status, body)\n");
        out.push_str("    }\n");
    }

    out.push_str("}\n\n");
    out
}

fn unary_methods(
    service: &ServiceDescriptor,
) -> impl Iterator<Item = &crate::descriptor::MethodDescriptor> {
    service.methods.iter().filter(|m| m.mode == Mode::Unary)
}

fn handler_name(method: &crate::descriptor::MethodDescriptor) -> String {
    format!("handle_{}", method.name.to_snake_case())
}
