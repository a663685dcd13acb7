//! Native binding emission: bus client, handler trait, server adapter
//!
//! Output is plain Rust source meant to be `include!`d next to the
//! prost-generated message types, so message types are referenced by
//! their in-module names and everything else through `::protobus`.

use crate::descriptor::{Mode, ServiceDescriptor};

/// Generate the full native binding for one service.
pub fn generate(service: &ServiceDescriptor) -> String {
    let mut out = String::new();
    out.push_str(&generate_client(service));
    out.push_str(&generate_handler_trait(service));
    out.push_str(&generate_server(service));
    out
}

/// Generate the `<Service>Client` struct.
fn generate_client(service: &ServiceDescriptor) -> String {
    let name = &service.name;
    let mut out = String::new();

    out.push_str(&format!("/// Bus client for `{name}`.\n"));
    out.push_str("#[derive(Clone)]\n");
    out.push_str(&format!("pub struct {name}Client {{\n"));
    out.push_str("    bus: ::protobus::BusConnection,\n");
    out.push_str("}\n\n");

    out.push_str(&format!("impl {name}Client {{\n"));
    out.push_str("    pub fn new(bus: ::protobus::BusConnection) -> Self {\n");
    out.push_str("        Self { bus }\n");
    out.push_str("    }\n");

    for method in &service.methods {
        let rust_name = &method.rust_name;
        let input = &method.input_type;
        let output = &method.output_type;
        let subject = service.subject(&method.name);
        out.push('\n');
        match method.mode {
            Mode::Unary => {
                out.push_str(&format!(
                    "    pub async fn {rust_name}(&self, input: &{input}) -> ::protobus::Result<{output}> {{\n"
                ));
                out.push_str(&format!("        self.bus.call(\"{subject}\", input).await\n"));
            }
            Mode::ClientStream => {
                out.push_str(&format!(
                    "    pub async fn {rust_name}(&self) -> ::protobus::Result<::protobus::ClientStream<{input}, {output}>> {{\n"
                ));
                out.push_str(&format!(
                    "        self.bus.open_client_stream(\"{subject}\").await\n"
                ));
            }
            Mode::ServerStream => {
                out.push_str(&format!(
                    "    pub async fn {rust_name}(&self, input: &{input}) -> ::protobus::Result<::protobus::ServerStream<{output}>> {{\n"
                ));
                out.push_str(&format!(
                    "        self.bus.open_server_stream(\"{subject}\", input).await\n"
                ));
            }
        }
        out.push_str("    }\n");
    }

    // Built-in liveness probe; answered by the handler's default
    // implementation unless overridden.
    out.push('\n');
    out.push_str(
        "    pub async fn health_check(&self) -> ::protobus::Result<::protobus::HealthCheckInfo> {\n",
    );
    out.push_str(&format!(
        "        self.bus.call(\"{}\", &::protobus::Empty {{}}).await\n",
        service.health_subject()
    ));
    out.push_str("    }\n");
    out.push_str("}\n\n");
    out
}

/// Generate the `<Service>Handler` trait.
fn generate_handler_trait(service: &ServiceDescriptor) -> String {
    let name = &service.name;
    let mut out = String::new();

    out.push_str(&format!("/// Server-side implementation of `{name}`.\n"));
    out.push_str("#[::protobus::async_trait]\n");
    out.push_str(&format!("pub trait {name}Handler: Send + Sync + 'static {{\n"));

    for method in &service.methods {
        let rust_name = &method.rust_name;
        let input = &method.input_type;
        let output = &method.output_type;
        match method.mode {
            Mode::Unary => out.push_str(&format!(
                "    async fn {rust_name}(&self, ctx: ::protobus::CallContext, input: {input}) -> ::protobus::Result<{output}>;\n"
            )),
            Mode::ClientStream => out.push_str(&format!(
                "    async fn {rust_name}(&self, ctx: ::protobus::CallContext, input: ::protobus::InboundFrames<{input}>) -> ::protobus::Result<{output}>;\n"
            )),
            Mode::ServerStream => out.push_str(&format!(
                "    async fn {rust_name}(&self, ctx: ::protobus::CallContext, input: {input}, output: ::protobus::StreamSink<{output}>) -> ::protobus::Result<()>;\n"
            )),
        }
    }

    out.push_str(
        "    async fn health_check(&self, _ctx: ::protobus::CallContext) -> ::protobus::Result<::protobus::HealthCheckInfo> {\n",
    );
    out.push_str("        Ok(::protobus::HealthCheckInfo::default())\n");
    out.push_str("    }\n");
    out.push_str("}\n\n");
    out
}

/// Generate the `<Service>Server` adapter that registers every method on
/// a dispatcher and binds it.
fn generate_server(service: &ServiceDescriptor) -> String {
    let name = &service.name;
    let namespace = &service.namespace;
    let mut out = String::new();

    out.push_str(&format!("pub struct {name}Server;\n\n"));
    out.push_str(&format!("impl {name}Server {{\n"));
    out.push_str(&format!("    pub async fn bind<H: {name}Handler>(\n"));
    out.push_str("        bus: ::protobus::BusConnection,\n");
    out.push_str("        handler: ::std::sync::Arc<H>,\n");
    out.push_str("    ) -> ::protobus::Result<::protobus::BoundService> {\n");
    out.push_str(&format!(
        "        let mut dispatcher = ::protobus::ServiceDispatcher::new(bus, \"{namespace}\", \"{name}\");\n"
    ));

    for method in &service.methods {
        let proto_name = &method.name;
        let rust_name = &method.rust_name;
        let input = &method.input_type;
        let output = &method.output_type;
        out.push_str("        {\n");
        out.push_str("            let handler = handler.clone();\n");
        match method.mode {
            Mode::Unary => {
                out.push_str(&format!(
                    "            dispatcher.unary(\"{proto_name}\", move |ctx, input: {input}| {{\n"
                ));
                out.push_str("                let handler = handler.clone();\n");
                out.push_str(&format!(
                    "                async move {{ handler.{rust_name}(ctx, input).await }}\n"
                ));
            }
            Mode::ClientStream => {
                out.push_str(&format!(
                    "            dispatcher.client_stream(\"{proto_name}\", move |ctx, input: ::protobus::InboundFrames<{input}>| {{\n"
                ));
                out.push_str("                let handler = handler.clone();\n");
                out.push_str(&format!(
                    "                async move {{ handler.{rust_name}(ctx, input).await }}\n"
                ));
            }
            Mode::ServerStream => {
                out.push_str(&format!(
                    "            dispatcher.server_stream(\"{proto_name}\", move |ctx, input: {input}, output: ::protobus::StreamSink<{output}>| {{\n"
                ));
                out.push_str("                let handler = handler.clone();\n");
                out.push_str(&format!(
                    "                async move {{ handler.{rust_name}(ctx, input, output).await }}\n"
                ));
            }
        }
        out.push_str("            })?;\n");
        out.push_str("        }\n");
    }

    out.push_str("        {\n");
    out.push_str("            let handler = handler.clone();\n");
    out.push_str(&format!(
        "            dispatcher.unary(\"{name}HealthCheck\", move |ctx, _input: ::protobus::Empty| {{\n"
    ));
    out.push_str("                let handler = handler.clone();\n");
    out.push_str("                async move { handler.health_check(ctx).await }\n");
    out.push_str("            })?;\n");
    out.push_str("        }\n");
    out.push_str("        dispatcher.bind().await\n");
    out.push_str("    }\n");
    out.push_str("}\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MethodDescriptor;

    fn service() -> ServiceDescriptor {
        ServiceDescriptor {
            name: "OrderService".to_string(),
            namespace: "orders.v1".to_string(),
            methods: vec![
                MethodDescriptor {
                    name: "GetOrder".to_string(),
                    rust_name: "get_order".to_string(),
                    input_type: "GetOrderRequest".to_string(),
                    output_type: "GetOrderResponse".to_string(),
                    mode: Mode::Unary,
                    http_path: "/api/orders.v1/OrderService/GetOrder".to_string(),
                },
                MethodDescriptor {
                    name: "ImportOrders".to_string(),
                    rust_name: "import_orders".to_string(),
                    input_type: "Order".to_string(),
                    output_type: "ImportSummary".to_string(),
                    mode: Mode::ClientStream,
                    http_path: "/api/orders.v1/OrderService/ImportOrders".to_string(),
                },
                MethodDescriptor {
                    name: "ListOrders".to_string(),
                    rust_name: "list_orders".to_string(),
                    input_type: "ListOrdersRequest".to_string(),
                    output_type: "Order".to_string(),
                    mode: Mode::ServerStream,
                    http_path: "/api/orders.v1/OrderService/ListOrders".to_string(),
                },
            ],
        }
    }

    #[test]
    fn client_calls_the_deterministic_subjects() {
        let out = generate(&service());
        assert!(out.contains("self.bus.call(\"orders.v1/GetOrder\", input).await"));
        assert!(out.contains("self.bus.open_client_stream(\"orders.v1/ImportOrders\").await"));
        assert!(out.contains("self.bus.open_server_stream(\"orders.v1/ListOrders\", input).await"));
        assert!(out.contains("self.bus.call(\"orders.v1/OrderServiceHealthCheck\""));
    }

    #[test]
    fn handler_trait_matches_each_call_shape() {
        let out = generate(&service());
        assert!(out.contains(
            "async fn get_order(&self, ctx: ::protobus::CallContext, input: GetOrderRequest) -> ::protobus::Result<GetOrderResponse>;"
        ));
        assert!(out.contains("input: ::protobus::InboundFrames<Order>"));
        assert!(out.contains("output: ::protobus::StreamSink<Order>"));
        assert!(out.contains("Ok(::protobus::HealthCheckInfo::default())"));
    }

    #[test]
    fn server_registers_every_method_and_the_health_check() {
        let out = generate(&service());
        assert!(out.contains("dispatcher.unary(\"GetOrder\""));
        assert!(out.contains("dispatcher.client_stream(\"ImportOrders\""));
        assert!(out.contains("dispatcher.server_stream(\"ListOrders\""));
        assert!(out.contains("dispatcher.unary(\"OrderServiceHealthCheck\""));
        assert!(out.contains("dispatcher.bind().await"));
    }
}
