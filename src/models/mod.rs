//! 数据模型模块

pub mod account;
pub mod auth;

pub use account::{Account, AccountResponse, NewAccount, Role};
pub use auth::{LoginRequest, LoginResponse, Page, RegisterRequest};
