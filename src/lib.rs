//! GCP 运维只读 MCP 服务核心库
//! 协议引擎、工具注册、护栏校验、时间范围解析与错误聚合各自独立成模块。

pub mod aggregate;
pub mod config;
pub mod error;
pub mod gcp;
pub mod guardrail;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod model;
pub mod monitoring;
pub mod registry;
pub mod source;
pub mod timerange;
pub mod tools;
