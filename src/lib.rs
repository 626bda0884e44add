//! 视频模板管理后台：登录网关
//! 登录限流、凭据校验、账户状态检查、密码强度规则及其 HTTP 接口

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod response;
pub mod routes;
pub mod services;
pub mod telemetry;
