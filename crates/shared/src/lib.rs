//! 共享库
//!
//! 包含分析引擎与宿主服务共用的配置、错误处理、可观测性与测试工具。

pub mod config;
pub mod error;
pub mod observability;
pub mod test_utils;
