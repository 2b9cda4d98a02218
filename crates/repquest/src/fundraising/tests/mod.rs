mod common;
mod dispatch;
mod service;
