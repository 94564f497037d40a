pub mod conditions;
pub mod expression_table;
pub(crate) mod prepare;
