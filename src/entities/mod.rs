pub mod prelude;
pub mod request;
