pub mod entity;
pub mod entity_record;
pub mod incident;
pub mod project;
pub mod record;
pub mod task;
