pub mod convert;
pub mod files;
pub mod folders;
pub mod health;
