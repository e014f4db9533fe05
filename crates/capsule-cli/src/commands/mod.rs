pub mod bump_schema;
pub mod package;
pub mod registry_check;
pub mod validate;
pub mod watch;
