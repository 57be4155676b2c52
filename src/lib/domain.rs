pub mod commitment;
pub mod events;
pub mod field;
pub mod merkle;
pub mod nullifier;
pub mod root_history;
