//! Obsidian 笔记库 MCP 工具核心库
//! guard 负责路径约束，scanner 负责搜索与读取，tools/mcp/http 对外提供服务。

pub mod config;
pub mod error;
pub mod guard;
pub mod model;
pub mod scanner;
pub mod tools;
pub mod mcp;
pub mod http;
