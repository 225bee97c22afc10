// src/models/mod.rs

pub mod answer;
pub mod exam_record;
pub mod question;
pub mod session;
