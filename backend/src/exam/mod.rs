// src/exam/mod.rs

pub mod countdown;
pub mod finalize;
pub mod history;
pub mod registry;
pub mod scorer;
pub mod source;
pub mod store;
