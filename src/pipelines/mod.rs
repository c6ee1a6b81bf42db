pub mod call_variants;
pub mod variants;
