pub mod login_logs;
pub mod users;

pub use login_logs::*;
pub use users::*;
