//! Route modules for Muda Server

pub mod health;
pub mod sync;
pub mod upload;
