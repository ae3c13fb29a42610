//! Application services: every cacheable read and every write of the
//! storefront goes through one of these.

pub mod account;
pub mod catalog;
pub mod commerce;
pub mod content;
pub mod error;
pub mod pagination;
pub mod reference;
pub mod repos;
