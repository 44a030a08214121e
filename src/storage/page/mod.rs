mod fixed;
mod slotted;

pub use fixed::FixedPage;
pub use slotted::SlottedPage;
