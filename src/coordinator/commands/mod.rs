pub mod control;
pub mod poll_attributes;
pub mod raw_query;
pub mod write_attribute;
