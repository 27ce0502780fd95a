// routes/mod.rs
// Route handlers grouped by feature, re-exported for `build_app`.

pub mod admin;
pub mod bank_accounts;
pub mod customers;
pub mod expenses;
pub mod helpers;
pub mod home;
pub mod inventory;
pub mod login;
pub mod logout;
pub mod payments;
pub mod payroll;
pub mod pdf;
pub mod profit_loss;
pub mod qrcode;
pub mod sales_close;

pub use admin::*;
pub use bank_accounts::*;
pub use customers::*;
pub use expenses::*;
pub use home::home;
pub use inventory::*;
pub use login::login;
pub use logout::logout;
pub use payments::*;
pub use payroll::*;
pub use profit_loss::*;
pub use sales_close::{CloseScope, close_routes, sales_close_page, sales_close_summary};
