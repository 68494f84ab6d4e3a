// Library root for the application services: conversational transaction
// entry, reports and insights, and attendance notifications, all running
// over the shared ledger.

pub mod dialog;
pub mod insights;
pub mod notifications;
pub mod reports;
pub mod services;

pub use services::AppServices;
