//! protoc plugin entry point
//!
//! protoc speaks to plugins over stdin/stdout with prost-encodable
//! messages; diagnostics go to stderr so they never corrupt the response
//! stream.

use std::io::{Read, Write};

use prost::Message;
use prost_types::compiler::CodeGeneratorRequest;

use protobus_codegen::plugin;

fn main() -> protobus_codegen::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let mut input = Vec::new();
    std::io::stdin().read_to_end(&mut input)?;
    let request = CodeGeneratorRequest::decode(input.as_slice())?;

    let response = plugin::run(&request);
    std::io::stdout().write_all(&response.encode_to_vec())?;
    Ok(())
}
