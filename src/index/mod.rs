pub mod codec;
pub mod extendible_hash_table;
pub mod hash_function;
