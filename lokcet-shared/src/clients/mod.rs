pub mod blob;
pub mod db;
pub mod kv;
pub mod push;
