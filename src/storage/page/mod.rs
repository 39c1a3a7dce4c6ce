pub mod hash_table_bucket_page;
pub mod hash_table_directory_page;
pub mod hash_table_header_page;
pub mod page;
pub mod page_guard;
