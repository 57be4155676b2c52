pub mod chain;
pub mod hasher;
pub mod store;
