//! Rule text encoding and occurrence-date expansion.

pub mod codec;
pub mod generator;

pub use codec::{DecodedRule, RuleStringCodec};
pub use generator::InstanceDateGenerator;
