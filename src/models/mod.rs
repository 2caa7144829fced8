pub mod search_response;
pub mod server_info;
