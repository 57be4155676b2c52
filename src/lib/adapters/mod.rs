pub mod abi;
pub mod ethereum;
pub mod file_store;
pub mod memory_store;
pub mod merkle_tree;
pub mod mock_chain;
