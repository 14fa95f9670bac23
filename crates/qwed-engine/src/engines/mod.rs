//! The deterministic engine family.

pub mod arithmetic;
pub mod claim;
pub mod code;
pub mod logic;
pub mod schema;
pub mod sql;
mod taint;

pub use arithmetic::ArithmeticEngine;
pub use code::CodeSafetyEngine;
pub use logic::LogicEngine;
pub use schema::JsonSchemaEngine;
pub use sql::SqlSafetyEngine;
