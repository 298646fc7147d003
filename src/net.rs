pub mod interface;
pub mod scope;
