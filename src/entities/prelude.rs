#![allow(unused_imports)]

pub use super::request::Entity as Request;
