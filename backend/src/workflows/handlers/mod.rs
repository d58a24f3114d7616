// Built-in action handlers, grouped by the entity they write.

pub mod calendar;
pub mod fields;
pub mod notify;
pub mod project;
pub mod task;
