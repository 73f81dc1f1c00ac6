//! IMAP command handlers for the fake server, one module per command
//! the backup client sends: LOGIN, LIST, SELECT, SEARCH, FETCH, LOGOUT.

mod fetch;
mod login;

pub use fetch::handle_fetch;
pub use list::handle_list;
pub use login::handle_login;
pub use logout::handle_logout;
pub use search::handle_search;
pub use select::handle_select;
