//! Model Context Protocol surface: JSON-RPC types, tool payloads, the
//! dispatcher and the stdio transport.

pub mod protocol;
pub mod server;
pub mod stdio;
pub mod tools;

pub use server::McpServer;
