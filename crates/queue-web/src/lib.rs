//! # 候诊队列Web模块
//!
//! 提供登记、状态更新、优先级修正和队列查询的HTTP接口，
//! 以及基于Server-Sent Events的实时视图推送。

pub mod handlers;
pub mod server;
pub mod stream;

pub use handlers::ApiError;
pub use server::{AppState, WebServer};
