pub mod mcp23s17;
