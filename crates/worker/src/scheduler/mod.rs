pub mod alert;
pub mod posting;

pub use alert::AlertScheduler;
pub use posting::PostingScheduler;
